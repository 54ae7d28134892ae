//! Domain models shared by the orchestration core and the HTTP layer

pub mod entity;
pub mod job;
pub mod run;

pub use entity::{Bill, Committee, District, Entity, EntityPayload, Politician, Vote};
pub use job::{JobDefinition, JobSummary};
pub use run::{NewRun, Run, RunProgress, RunStatus, RunSummary, TriggeredBy};
