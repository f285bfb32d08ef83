mod client;
mod feed;
mod record;

pub use client::{ApiErrorClass, StoreClient, StoreError};
pub use feed::ChangeFeed;
pub use record::{
    Account, BlobRef, ChangeBatch, ChangeKind, ChangePage, FileRecord, NewFileRecord,
    RecordChange, RecordUpdate, SortOrder, TimestampError, extension_of, format_millis,
    now_millis, parse_millis,
};
