//! The dummy replay client (spec §4.9). Guards its buffer with a mutex
//! because the forwarded-result handler runs on the network thread while
//! the replay runs on a worker thread (spec §5, "Validation state is the
//! sole cross-thread shared resource").

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use crate::store::{Key, Timestamp, Value};

type PendingKey = (u64, u64, Key);

#[derive(Default)]
struct Buffer {
    write_set: HashMap<PendingKey, Value>,
    /// Resolved or out-of-order-arrived reads, keyed the same as a
    /// pending get so a result that beats the validator's `get` call is
    /// simply sitting here already when `get` checks.
    read_set: HashMap<PendingKey, (Option<Value>, Timestamp)>,
}

pub struct ValidationClient {
    buffer: Mutex<Buffer>,
    arrived: Condvar,
}

impl ValidationClient {
    pub fn new() -> Self {
        ValidationClient { buffer: Mutex::new(Buffer::default()), arrived: Condvar::new() }
    }

    pub fn record_write(&self, client_id: u64, seq: u64, key: Key, value: Value) {
        let mut buffer = self.buffer.lock().expect("validation buffer poisoned");
        buffer.write_set.insert((client_id, seq, key), value);
    }

    /// Write-through buffer check (write_set, then read_set); if neither
    /// has the key, parks until a `forward_read_result` call for this
    /// (client_id, seq, key) wakes it.
    pub fn get(&self, client_id: u64, seq: u64, key: &[u8]) -> (Option<Value>, Timestamp) {
        let pending = (client_id, seq, key.to_vec());
        let mut buffer = self.buffer.lock().expect("validation buffer poisoned");
        if let Some(value) = buffer.write_set.get(&pending) {
            return (Some(value.clone()), Timestamp::MIN);
        }
        loop {
            if let Some(result) = buffer.read_set.get(&pending) {
                return result.clone();
            }
            buffer = self.arrived.wait(buffer).expect("validation buffer poisoned");
        }
    }

    /// Fulfills a parked `get`, or if it arrives first, records the
    /// result for `get` to pick up once the validator reaches that read.
    pub fn forward_read_result(&self, client_id: u64, seq: u64, key: Key, value: Option<Value>, ts: Timestamp) {
        let mut buffer = self.buffer.lock().expect("validation buffer poisoned");
        buffer.read_set.insert((client_id, seq, key), (value, ts));
        self.arrived.notify_all();
    }

    /// Clears state between validations -- this client replays one
    /// transaction's worth of reads/writes at a time.
    pub fn reset(&self) {
        let mut buffer = self.buffer.lock().expect("validation buffer poisoned");
        buffer.write_set.clear();
        buffer.read_set.clear();
    }
}

impl Default for ValidationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_through_buffer_prefers_write_set() {
        let client = ValidationClient::new();
        client.record_write(1, 1, b"k".to_vec(), b"written".to_vec());
        client.forward_read_result(1, 1, b"k".to_vec(), Some(b"forwarded".to_vec()), Timestamp::new(1, 1));
        assert_eq!(client.get(1, 1, b"k").0, Some(b"written".to_vec()));
    }

    #[test]
    fn out_of_order_forward_is_seen_by_a_later_get() {
        let client = ValidationClient::new();
        client.forward_read_result(1, 1, b"k".to_vec(), Some(b"v".to_vec()), Timestamp::new(5, 1));
        let (value, ts) = client.get(1, 1, b"k");
        assert_eq!(value, Some(b"v".to_vec()));
        assert_eq!(ts, Timestamp::new(5, 1));
    }

    #[test]
    fn get_blocks_until_forward_read_result_arrives() {
        let client = Arc::new(ValidationClient::new());
        let reader = client.clone();
        let handle = thread::spawn(move || reader.get(1, 1, b"k"));

        thread::sleep(Duration::from_millis(20));
        client.forward_read_result(1, 1, b"k".to_vec(), Some(b"late".to_vec()), Timestamp::new(2, 1));

        let (value, _) = handle.join().unwrap();
        assert_eq!(value, Some(b"late".to_vec()));
    }
}
