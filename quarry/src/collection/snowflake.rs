use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;

const NODE_ID_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_NODE_ID: u64 = (1 << NODE_ID_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_LEFT_SHIFT: u64 = SEQUENCE_BITS + NODE_ID_BITS;
const EPOCH: u64 = 1288834974657;

struct SnowflakeState {
    last_timestamp: u64,
    sequence: u64,
}

/// Generates roughly time-ordered 64-bit ids.
///
/// Generated ids are rendered as decimal strings and used as `_id` values,
/// which keeps them valid as file names for directory-backed collections.
pub struct SnowflakeIdGenerator {
    node_id: u64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIdGenerator {
    pub fn new() -> Self {
        let node_id = Self::random_node_id();
        log::debug!("Initialized id generator with node id: {}", node_id);
        SnowflakeIdGenerator {
            node_id,
            state: Mutex::new(SnowflakeState {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    pub fn get_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut timestamp = Self::current_millis().max(state.last_timestamp);

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // sequence exhausted for this millisecond, move to the next one
                timestamp += 1;
                while Self::current_millis() < timestamp {
                    std::thread::yield_now();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        ((timestamp - EPOCH) << TIMESTAMP_LEFT_SHIFT)
            | (self.node_id << SEQUENCE_BITS)
            | state.sequence
    }

    /// Returns a fresh id as the string form stored in `_id`.
    pub fn next_id(&self) -> String {
        self.get_id().to_string()
    }

    fn current_millis() -> u64 {
        Utc::now().timestamp_millis().max(EPOCH as i64) as u64
    }

    fn random_node_id() -> u64 {
        let uuid = uuid::Uuid::new_v4();
        let bytes = uuid.as_bytes();
        let random = OsRng.gen::<u64>();
        ((bytes[bytes.len() - 1] as u64) ^ random) & MAX_NODE_ID
    }
}

impl Default for SnowflakeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
