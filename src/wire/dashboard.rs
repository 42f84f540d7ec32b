//! Dashboard service contract (account and organization lookups)

use crate::wire::generation::RpcError;

#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationMember {
    pub organization: Organization,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub profile_picture: String,
    pub organizations: Vec<OrganizationMember>,
}

pub trait DashboardService: Send + Sync {
    fn get_me(&self) -> Result<User, RpcError>;
    fn get_organization(&self, id: &str) -> Result<Organization, RpcError>;
}
