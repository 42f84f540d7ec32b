//! Project service contract

use crate::wire::generation::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectAccess {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectStatus {
    Inactive,
    #[default]
    Active,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAssetUse {
    Undefined,
    Input,
    Output,
    Intermediate,
    Project,
}

/// Asset registered against a remote project
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectAsset {
    pub id: String,
    pub uri: String,
    pub asset_use: ProjectAssetUse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub access: ProjectAccess,
    pub status: ProjectStatus,
    pub file: Option<ProjectAsset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateProjectRequest {
    pub title: String,
    pub access: ProjectAccess,
    pub status: ProjectStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateProjectRequest {
    pub id: String,
    pub title: Option<String>,
    pub file: Option<ProjectAsset>,
}

/// Blocking client side of the project service
pub trait ProjectService: Send + Sync {
    fn create(&self, request: &CreateProjectRequest) -> Result<Project, RpcError>;
    fn get(&self, id: &str) -> Result<Project, RpcError>;
    fn delete(&self, id: &str) -> Result<(), RpcError>;
    fn list(&self, owner_id: &str) -> Result<Vec<Project>, RpcError>;
    fn update(&self, request: &UpdateProjectRequest) -> Result<Project, RpcError>;
    fn query_assets(&self, id: &str) -> Result<Vec<ProjectAsset>, RpcError>;
}
