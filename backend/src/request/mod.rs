pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod repository;
pub mod repository_sqlx;
