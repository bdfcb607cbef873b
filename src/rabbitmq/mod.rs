pub mod config;
pub mod publisher;
pub mod subscriber;

pub use config::RabbitMQConfig;
pub use publisher::RabbitMQPublisher;
pub use subscriber::RabbitMQSubscriber;
