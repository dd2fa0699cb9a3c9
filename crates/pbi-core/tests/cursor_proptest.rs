use chrono::{TimeZone, Utc};
use pbi_core::Cursor;
use proptest::prelude::*;
use uuid::Uuid;

proptest! {
    #[test]
    fn cursor_round_trips_for_any_instant_and_id(
        secs in 0i64..4_102_444_800i64, // 1970..2100
        id_bytes in proptest::array::uniform16(any::<u8>()),
    ) {
        let created_at = Utc.timestamp_opt(secs, 0).single().unwrap();
        let cursor = Cursor { created_at, id: Uuid::from_bytes(id_bytes) };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        prop_assert_eq!(cursor, decoded);
    }
}
