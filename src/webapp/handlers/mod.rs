pub mod health;
pub use self::health::health;

pub async fn root() -> &'static str {
    "Hello, World!"
}
