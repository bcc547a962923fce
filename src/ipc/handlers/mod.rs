pub mod classrooms;
pub mod core;
pub mod grades;
pub mod periods;
