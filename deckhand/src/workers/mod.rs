pub mod health_checker;
