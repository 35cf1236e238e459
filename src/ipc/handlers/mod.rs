pub mod attendance;
pub mod class_logins;
pub mod core;
pub mod departments;
pub mod maintenance;
pub mod percentage;
pub mod staff;
pub mod students;
pub mod subjects;
