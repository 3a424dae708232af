mod bootstrap;
mod error;
mod models;
pub mod store;

pub use bootstrap::MongoSettings;
pub use error::MongoDaoError;
pub use store::MongoRoomStore;

use crate::dao::room_store::StoreError;

impl From<MongoDaoError> for StoreError {
    fn from(err: MongoDaoError) -> Self {
        StoreError::Backend {
            op: err.op(),
            source: Box::new(err),
        }
    }
}
