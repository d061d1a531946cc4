mod key_record;

pub use key_record::{
    KeyPool,
    KeyRecord,
    PoolCounts,
    insert_key,
    take_next_unused_key,
    mark_key_used,
    get_key_record,
    list_keys,
    count_keys
};
