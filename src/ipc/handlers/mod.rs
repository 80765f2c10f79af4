pub mod analytics;
pub mod classes;
pub mod core;
pub mod grading;
pub mod reports;
pub mod results;
pub mod setup;
pub mod students;
pub mod subjects;
pub mod teachers;
