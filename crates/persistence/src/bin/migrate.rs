#![deny(warnings)]

use persistence::default_sqlite_url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| default_sqlite_url().to_string());
    // Ensure directory exists
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"));
    if let Some(path) = path.filter(|p| !p.contains(":memory:")) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = persistence::init_db(&url).await?;
    pool.close().await;
    println!("DB migrated at {}", url);
    Ok(())
}
