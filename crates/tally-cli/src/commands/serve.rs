//! Server command implementation

use std::path::Path;

use anyhow::Result;

use super::{load_categories, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    config: Option<&Path>,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    // Parse API keys and CORS origins from environment (comma-separated)
    let api_keys = tally_server::parse_list(&std::env::var("TALLY_API_KEYS").unwrap_or_default());
    let allowed_origins =
        tally_server::parse_list(&std::env::var("TALLY_ALLOWED_ORIGINS").unwrap_or_default());

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if api_keys.is_empty() {
        println!("   ❌ Authentication: no API keys configured (set TALLY_API_KEYS)");
        println!("      Every request will be rejected until a key is set");
    } else {
        println!(
            "   🔑 API keys: {} configured (TALLY_API_KEYS)",
            api_keys.len()
        );
    }
    if !allowed_origins.is_empty() {
        println!("   🌐 CORS origins: {}", allowed_origins.join(", "));
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    let categories = load_categories(config)?;

    let config = tally_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins,
        api_keys,
    };

    tally_server::serve_with_config(db, categories, host, port, config).await?;

    Ok(())
}
