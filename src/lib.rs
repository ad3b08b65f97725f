pub mod app;
pub mod error;
pub mod handlers;
pub mod openai;
pub mod stream;
pub mod thinking;
pub mod upstream;
