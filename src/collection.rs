//! Collection lookup shared between the source and destination connectors.

use crate::error::{Error, Result};
use bson::Document;
use mongodb::{Client, Collection};

/// Return a handle to `collection` in `db`, verifying that both exist.
///
/// The driver creates databases and collections implicitly on first write,
/// so both are checked against the server's listings before any handle is
/// handed out.
pub(crate) async fn get_collection(
    client: &Client,
    db: &str,
    collection: &str,
) -> Result<Collection<Document>> {
    let database_names = client
        .list_database_names()
        .await
        .map_err(|e| Error::engine("list database names", e))?;

    if !database_names.iter().any(|name| name == db) {
        return Err(Error::Config(format!("database {db:?} doesn't exist")));
    }

    let database = client.database(db);

    let collection_names = database
        .list_collection_names()
        .await
        .map_err(|e| Error::engine("list collection names", e))?;

    if !collection_names.iter().any(|name| name == collection) {
        return Err(Error::Config(format!(
            "collection {collection:?} doesn't exist"
        )));
    }

    Ok(database.collection(collection))
}
