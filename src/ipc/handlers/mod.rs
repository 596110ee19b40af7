pub mod audit;
pub mod backup_exchange;
pub mod classrooms;
pub mod core;
pub mod import;
pub mod photos;
pub mod reports;
pub mod schools;
pub mod seating;
pub mod students;
pub mod surveys;
pub mod users;
