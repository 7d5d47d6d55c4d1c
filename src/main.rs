//! letter-vault: private letter vault server.
//!
//! See [`letter_vault::web`] for configuration.

#[tokio::main]
async fn main() {
    if let Err(error) = letter_vault::web::run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
