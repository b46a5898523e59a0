//! Key encoding utilities for `RocksDB`.
//!
//! All IDs are 16-byte UUIDs, so composite keys have fixed-width prefixes and
//! support efficient prefix scans.

use fleet_core::{JobId, ServerId};

/// Width of every encoded ID.
pub const ID_LEN: usize = 16;

/// Encode a primary key from raw ID bytes.
#[must_use]
pub fn record_key(id: &[u8; ID_LEN]) -> Vec<u8> {
    id.to_vec()
}

/// Encode a server index key: `server_id || record_id`.
#[must_use]
pub fn server_index_key(server_id: &ServerId, record_id: &[u8; ID_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(server_id.as_bytes());
    key.extend_from_slice(record_id);
    key
}

/// Encode a server prefix for scanning all records of a server.
#[must_use]
pub fn server_prefix(server_id: &ServerId) -> Vec<u8> {
    server_id.as_bytes().to_vec()
}

/// Extract the record key from a server index key.
///
/// # Panics
///
/// Panics if the key is shorter than 32 bytes.
#[must_use]
pub fn record_key_from_server_index(key: &[u8]) -> &[u8] {
    &key[ID_LEN..ID_LEN * 2]
}

/// Encode a status-job index key: `status || job_id`.
#[must_use]
pub fn status_job_key(status: u8, job_id: &[u8; ID_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(status);
    key.extend_from_slice(job_id);
    key
}

/// Encode a status prefix for scanning all jobs by status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the job key from a status-job index key.
///
/// # Panics
///
/// Panics if the key is shorter than 17 bytes.
#[must_use]
pub fn record_key_from_status_index(key: &[u8]) -> &[u8] {
    &key[1..=ID_LEN]
}

/// Encode a server-status-job index key: `server_id || status || job_id`.
#[must_use]
pub fn server_status_job_key(server_id: &ServerId, status: u8, job_id: &[u8; ID_LEN]) -> Vec<u8> {
    let mut key = server_status_prefix(server_id, status);
    key.extend_from_slice(job_id);
    key
}

/// Encode a prefix for scanning one server's jobs in one status.
#[must_use]
pub fn server_status_prefix(server_id: &ServerId, status: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2 + 1);
    key.extend_from_slice(server_id.as_bytes());
    key.push(status);
    key
}

/// Extract the job key from a server-status-job index key.
///
/// # Panics
///
/// Panics if the key is shorter than 33 bytes.
#[must_use]
pub fn record_key_from_server_status_index(key: &[u8]) -> &[u8] {
    &key[ID_LEN + 1..=ID_LEN * 2]
}

/// Encode a parent index key: `parent_job_id || job_id`.
#[must_use]
pub fn parent_job_key(parent_job_id: &JobId, job_id: &[u8; ID_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(parent_job_id.as_bytes());
    key.extend_from_slice(job_id);
    key
}

/// Extract the job key from a parent index key.
///
/// # Panics
///
/// Panics if the key is shorter than 32 bytes.
#[must_use]
pub fn record_key_from_parent_index(key: &[u8]) -> &[u8] {
    &key[ID_LEN..ID_LEN * 2]
}

/// Encode a program-name index key: `server_id || name`.
#[must_use]
pub fn program_name_key(server_id: &ServerId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + name.len());
    key.extend_from_slice(server_id.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}
