pub mod database;
pub mod error;
pub mod project_store;
pub mod projects;
pub mod row_helpers;
pub mod schema;
pub mod steps;
pub mod turns;

pub use database::Database;
pub use error::StoreError;
pub use project_store::{FileCreation, MessageScope, NewFile, NewMessage, ProjectStore};
pub use projects::SqliteProjectStore;
pub use steps::{StepKind, StepRepo, StepRow, StepStatus};
pub use turns::{TurnRepo, TurnRow, TurnStatus};
