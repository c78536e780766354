//! Well-known identifiers shared with the rest of the platform.

/// User group strings carried in the `user_group` claim.
pub mod user_group {
    /// Learner
    pub const STUDENT: &str = "USER_GROUP_STUDENT";
    /// Guardian of a learner
    pub const PARENT: &str = "USER_GROUP_PARENT";
    /// Teaching staff
    pub const TEACHER: &str = "USER_GROUP_TEACHER";
    /// School administrator
    pub const SCHOOL_ADMIN: &str = "USER_GROUP_SCHOOL_ADMIN";
    /// Platform administrator
    pub const ADMIN: &str = "USER_GROUP_ADMIN";
}

/// School (organization) ids. Assigned upwards from `i32::MIN`.
pub mod school {
    /// Platform operator
    pub const MANABIE: i32 = i32::MIN;
    /// JPREP, the SSO partner vendor
    pub const JPREP: i32 = MANABIE + 1;
    /// Synersia
    pub const SYNERSIA: i32 = MANABIE + 2;
    /// Renseikai
    pub const RENSEIKAI: i32 = MANABIE + 3;
    /// Internal testing school
    pub const TESTING: i32 = MANABIE + 4;
    /// GA
    pub const GA: i32 = MANABIE + 5;
    /// KEC
    pub const KEC: i32 = MANABIE + 6;
    /// AIC
    pub const AIC: i32 = MANABIE + 7;
    /// NSG
    pub const NSG: i32 = MANABIE + 8;
    /// Production end-to-end test school
    pub const E2E_TOKYO: i32 = MANABIE + 9;
}

/// Student division values issued by the JPREP SSO.
pub mod division {
    /// Always accepted
    pub const KIDS: &str = "kids";
    /// Accepted only behind the `a_plus_division` toggle
    pub const A_PLUS: &str = "a_plus";
}

#[cfg(test)]
mod tests {
    use super::school;

    #[test]
    fn school_ids_match_platform_values() {
        assert_eq!(school::MANABIE, -2_147_483_648);
        assert_eq!(school::JPREP, -2_147_483_647);
        assert_eq!(school::RENSEIKAI, -2_147_483_645);
        assert_eq!(school::AIC, -2_147_483_641);
        assert_eq!(school::E2E_TOKYO, -2_147_483_639);
    }
}
