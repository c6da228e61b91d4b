use log::{info, warn};
use thiserror::Error;

use crate::types::{AcCommand, AcState, FIELD_COUNT};

/// Offset of the state record inside non-volatile storage.
pub const STATE_OFFSET: usize = 0;
/// Size of the state record: one byte per field.
pub const STATE_RECORD_LEN: usize = FIELD_COUNT;

const MODE_RANGE: core::ops::RangeInclusive<u8> = 0..=4;
const TEMPERATURE_RANGE: core::ops::RangeInclusive<u8> = 16..=31;
const FAN_RANGE: core::ops::RangeInclusive<u8> = 0..=3;
const FLAG_RANGE: core::ops::RangeInclusive<u8> = 0..=1;
const FLAP_POSITION_RANGE: core::ops::RangeInclusive<u8> = 1..=11;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("storage commit failed: {0}")]
    Commit(String),
    #[error("access at offset {offset} with length {len} exceeds {capacity} byte storage")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("power field must be 0 or 1, got {0}")]
    InvalidPower(u8),
    #[error("command out of range: {}", .0.join(", "))]
    OutOfRange(Vec<&'static str>),
}

/// Byte-addressed non-volatile storage, EEPROM style.
pub trait Storage {
    /// Reads `len` bytes at `offset`. `Ok(None)` means nothing was ever
    /// written there.
    fn read(&mut self, offset: usize, len: usize) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stages `bytes` at `offset`. Not durable until [`Storage::commit`].
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Value that passed the range checks of [`StateStore`]. Only this module
/// can construct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated<T>(T);

impl<T> Validated<T> {
    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl Validated<AcState> {
    /// Next live state after `command` is applied. Fields 0-8 are taken from
    /// the command only when it powers the unit on; power is always taken.
    pub fn with_command(self, command: &Validated<AcCommand>) -> Validated<AcState> {
        let mut next = self.0;
        if command.0.is_power_on() {
            next = command.0.as_state();
        }
        next.power = command.0.power();
        Validated(next)
    }
}

/// Owner of the live [`AcState`] and of the storage it is persisted to.
pub struct StateStore<S> {
    storage: S,
    state: Validated<AcState>,
}

impl<S: Storage> StateStore<S> {
    /// Loads the persisted record, repairing it if needed.
    pub fn open(storage: S) -> Self {
        let mut store = Self {
            storage,
            state: Validated(AcState::DEFAULT),
        };
        let loaded = store.load();
        store.state = Validated(loaded);
        store
    }

    pub fn state(&self) -> &AcState {
        self.state.get()
    }

    pub fn current(&self) -> Validated<AcState> {
        self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Reads the last persisted record. Absent or unreadable records are
    /// replaced by [`AcState::DEFAULT`], which is persisted immediately.
    pub fn load(&mut self) -> AcState {
        let record = match self.storage.read(STATE_OFFSET, STATE_RECORD_LEN) {
            Ok(Some(bytes)) if bytes.len() == STATE_RECORD_LEN => {
                let mut fields = [0_u8; FIELD_COUNT];
                fields.copy_from_slice(&bytes);
                Some(AcState::from_fields(fields))
            }
            Ok(Some(bytes)) => {
                warn!("stored state record has {} bytes, expected {STATE_RECORD_LEN}", bytes.len());
                None
            }
            Ok(None) => {
                info!("no stored state record");
                None
            }
            Err(err) => {
                warn!("failed to read stored state: {err}");
                None
            }
        };

        match record {
            Some(state) => {
                info!("loaded state {:?}", state.to_fields());
                self.repair_if_invalid(state)
            }
            None => self.reset_to_default(),
        }
    }

    /// Returns `state` untouched when valid, otherwise persists and returns
    /// the default state.
    pub fn repair_if_invalid(&mut self, state: AcState) -> AcState {
        let failed = failed_checks(&state);
        if failed.is_empty() {
            return state;
        }

        warn!(
            "incorrect values in state {:?} ({}), resetting to default",
            state.to_fields(),
            failed.join(", ")
        );
        self.reset_to_default()
    }

    /// Persists `state` as the new authoritative value. The live value is
    /// replaced even when the write fails.
    pub fn commit(&mut self, state: Validated<AcState>) -> Result<(), StorageError> {
        self.state = state;
        persist(&mut self.storage, state.get())
    }

    fn reset_to_default(&mut self) -> AcState {
        self.state = Validated(AcState::DEFAULT);
        if let Err(err) = persist(&mut self.storage, &AcState::DEFAULT) {
            warn!("failed to persist default state: {err}");
        }
        AcState::DEFAULT
    }
}

/// True only when all six range checks pass.
pub fn validate(state: &AcState) -> bool {
    failed_checks(state).is_empty()
}

/// Checks an untrusted command. Power-on commands must pass every range
/// check; power-off commands only need a legal power field because the
/// remaining fields are never sent or stored.
pub fn validate_command(command: AcCommand) -> Result<Validated<AcCommand>, CommandError> {
    let power = command.power();
    if !FLAG_RANGE.contains(&power) {
        return Err(CommandError::InvalidPower(power));
    }

    if command.is_power_on() {
        let failed = failed_checks(&command.as_state());
        if !failed.is_empty() {
            return Err(CommandError::OutOfRange(failed));
        }
    }

    Ok(Validated(command))
}

fn persist<S: Storage>(storage: &mut S, state: &AcState) -> Result<(), StorageError> {
    storage.write(STATE_OFFSET, &state.to_fields())?;
    storage.commit()
}

/// Names of the range checks `state` fails. Every check runs. The binary
/// flags (light, turbo, xfan, sleep, power) pass or fail as one group.
fn failed_checks(state: &AcState) -> Vec<&'static str> {
    let checks = [
        ("mode", MODE_RANGE.contains(&state.mode)),
        ("temperature", TEMPERATURE_RANGE.contains(&state.temperature)),
        ("fan_speed", FAN_RANGE.contains(&state.fan_speed)),
        ("flap_auto", FLAG_RANGE.contains(&state.flap_auto)),
        (
            "flap_position",
            FLAP_POSITION_RANGE.contains(&state.flap_position),
        ),
        (
            "flags",
            state
                .options()
                .iter()
                .chain(core::iter::once(&state.power))
                .all(|flag| FLAG_RANGE.contains(flag)),
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect()
}

/// RAM-backed storage, erased to `0xFF` like a fresh EEPROM.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    staged: Vec<u8>,
    durable: Vec<u8>,
    commits: usize,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            staged: vec![0xFF; capacity],
            durable: vec![0xFF; capacity],
            commits: 0,
            fail_writes: false,
        }
    }

    pub fn with_record(record: &[u8]) -> Self {
        let mut storage = Self::new(STATE_RECORD_LEN.max(STATE_OFFSET + record.len()));
        storage.staged[STATE_OFFSET..STATE_OFFSET + record.len()].copy_from_slice(record);
        storage.durable = storage.staged.clone();
        storage
    }

    /// Bytes that survived the last commit.
    pub fn durable(&self) -> &[u8] {
        &self.durable
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        if offset.saturating_add(len) > self.staged.len() {
            return Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity: self.staged.len(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(STATE_RECORD_LEN)
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_bounds(offset, len)?;
        Ok(Some(self.staged[offset..offset + len].to_vec()))
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_bounds(offset, bytes.len())?;
        if self.fail_writes {
            return Err(StorageError::Write("simulated write failure".to_string()));
        }
        self.staged[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Commit("simulated commit failure".to_string()));
        }
        self.durable.clone_from(&self.staged);
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const DEFAULT_FIELDS: [u8; FIELD_COUNT] = [0, 24, 0, 1, 1, 0, 0, 0, 0, 0];

    #[test]
    fn default_state_is_valid() {
        assert!(validate(&AcState::DEFAULT));
        assert_eq!(AcState::DEFAULT.to_fields(), DEFAULT_FIELDS);
    }

    #[test]
    fn every_out_of_range_field_repairs_to_default() {
        let valid = [4, 18, 3, 0, 5, 1, 1, 0, 0, 1];
        let bad_values: [(usize, u8); 10] = [
            (0, 5),
            (1, 15),
            (1, 32),
            (2, 4),
            (3, 2),
            (4, 0),
            (4, 12),
            (5, 2),
            (8, 255),
            (9, 2),
        ];

        for (index, value) in bad_values {
            let mut fields = valid;
            fields[index] = value;
            let state = AcState::from_fields(fields);

            let mut store = StateStore::open(MemoryStorage::with_record(&valid));
            let repaired = store.repair_if_invalid(state);

            assert_eq!(repaired, AcState::DEFAULT, "field {index} = {value}");
            assert_eq!(*store.state(), AcState::DEFAULT, "field {index} = {value}");
            assert_eq!(store.storage().durable(), DEFAULT_FIELDS.as_slice());
        }
    }

    #[test]
    fn valid_state_is_left_untouched() {
        let mut store = StateStore::open(MemoryStorage::with_record(&DEFAULT_FIELDS));
        let commits = store.storage().commits();
        let state = AcState::from_fields([1, 31, 2, 1, 11, 0, 1, 1, 1, 1]);

        assert_eq!(store.repair_if_invalid(state), state);
        assert_eq!(store.storage().commits(), commits);
    }

    #[test]
    fn in_range_fields_do_not_flip_unrelated_checks() {
        let base = AcState::from_fields([0, 24, 0, 1, 1, 0, 0, 0, 0, 0]);
        for mode in 0..=4 {
            for fan_speed in 0..=3 {
                for light in 0..=1 {
                    let state = AcState {
                        mode,
                        fan_speed,
                        light,
                        ..base
                    };
                    assert!(validate(&state));

                    let broken = AcState {
                        temperature: 99,
                        ..state
                    };
                    assert!(!validate(&broken));
                }
            }
        }
    }

    #[test]
    fn all_failed_checks_are_reported() {
        let state = AcState::from_fields([9, 99, 9, 9, 0, 0, 0, 0, 7, 1]);
        assert_eq!(
            failed_checks(&state),
            vec![
                "mode",
                "temperature",
                "fan_speed",
                "flap_auto",
                "flap_position",
                "flags"
            ]
        );
    }

    #[test]
    fn erased_storage_loads_default_and_persists_it() {
        let store = StateStore::open(MemoryStorage::default());

        assert_eq!(*store.state(), AcState::DEFAULT);
        assert_eq!(store.storage().durable(), DEFAULT_FIELDS.as_slice());
        assert_eq!(store.storage().commits(), 1);
    }

    #[test]
    fn corrupted_record_loads_default() {
        let store = StateStore::open(MemoryStorage::with_record(&[0, 99, 0, 1, 1, 0, 0, 0, 0, 1]));

        assert_eq!(*store.state(), AcState::DEFAULT);
        assert_eq!(store.storage().durable(), DEFAULT_FIELDS.as_slice());
    }

    #[test]
    fn valid_record_is_restored_without_writing() {
        let record = [0, 24, 0, 1, 1, 1, 0, 0, 0, 1];
        let store = StateStore::open(MemoryStorage::with_record(&record));

        assert_eq!(store.state().to_fields(), record);
        assert_eq!(store.storage().commits(), 0);
    }

    #[test]
    fn short_storage_falls_back_to_default() {
        let store = StateStore::open(MemoryStorage::new(4));
        assert_eq!(*store.state(), AcState::DEFAULT);
    }

    #[test]
    fn commit_writes_whole_record() {
        let mut store = StateStore::open(MemoryStorage::default());
        let command =
            validate_command(AcCommand([4, 18, 3, 0, 5, 1, 1, 0, 0, 1]))
                .unwrap();

        let next = store.current().with_command(&command);
        store.commit(next).unwrap();

        assert_eq!(store.state().to_fields(), [4, 18, 3, 0, 5, 1, 1, 0, 0, 1]);
        assert_eq!(
            store.storage().durable(),
            [4, 18, 3, 0, 5, 1, 1, 0, 0, 1].as_slice()
        );
    }

    #[test]
    fn failed_commit_still_updates_live_state() {
        let mut storage = MemoryStorage::with_record(&DEFAULT_FIELDS);
        storage.set_fail_writes(true);
        let mut store = StateStore::open(storage);
        let command =
            validate_command(AcCommand([1, 20, 1, 1, 1, 0, 0, 0, 0, 1]))
                .unwrap();

        let next = store.current().with_command(&command);
        assert!(store.commit(next).is_err());
        assert_eq!(store.state().temperature, 20);
        assert_eq!(store.storage().durable(), DEFAULT_FIELDS.as_slice());
    }

    #[test]
    fn power_off_command_keeps_settings() {
        let store = StateStore::open(MemoryStorage::with_record(&[4, 18, 3, 0, 5, 1, 1, 0, 0, 1]));
        let off = validate_command(AcCommand([0; FIELD_COUNT])).unwrap();

        let next = store.current().with_command(&off);

        assert_eq!(next.get().to_fields(), [4, 18, 3, 0, 5, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn power_on_command_must_be_in_range() {
        let result =
            validate_command(AcCommand([0, 99, 0, 1, 1, 0, 0, 0, 0, 1]));
        assert_eq!(result, Err(CommandError::OutOfRange(vec!["temperature"])));

        let result =
            validate_command(AcCommand([0, 24, 0, 1, 1, 0, 0, 0, 0, 2]));
        assert_eq!(result, Err(CommandError::InvalidPower(2)));
    }

    #[test]
    fn memory_storage_rejects_out_of_bounds_access() {
        let mut storage = MemoryStorage::new(4);
        assert!(matches!(
            storage.write(2, &[1, 2, 3]),
            Err(StorageError::OutOfBounds { capacity: 4, .. })
        ));
        assert!(storage.read(0, 5).is_err());
    }
}
