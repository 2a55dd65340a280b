use mongodb::{Client, Database};

pub async fn connect(database_url: &str) -> mongodb::error::Result<Database> {
    let client = Client::with_uri_str(database_url).await?;

    let db = client
        .default_database()
        .unwrap_or_else(|| client.database("mpesa_payments"));

    match db.list_collection_names().await {
        Ok(collections) => {
            tracing::info!(
                "Connected to database '{}' ({} collections)",
                db.name(),
                collections.len()
            );
        }
        Err(e) => {
            tracing::warn!("Database '{}' may be inaccessible: {}", db.name(), e);
        }
    }

    Ok(db)
}
