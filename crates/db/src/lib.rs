pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod writer;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    AssignmentRepository, AssignmentSummaryRow, InMemoryAssignmentRepository, RepositoryError,
    SqlAssignmentRepository,
};
pub use writer::AssignmentWriter;
