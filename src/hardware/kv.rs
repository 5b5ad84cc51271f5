//! Persistent configuration and energy storage.
//!
//! [KvStore] is the contract the rest of the core programs against.
//! [KvLayout] implements it on top of any raw key/blob store (the board's
//! flash wrapper) using a stable on-flash layout:
//!
//! * `imax` — 4-byte IEEE-754 little-endian blob
//! * `vmin_<i>` / `vmax_<i>` — little-endian i16 per load
//! * `autorec_<i>` — u8 (0/1) per load
//! * `priority_<i>` — u8 per load
//! * `energy` — 8-byte IEEE-754 little-endian blob
//!
//! A missing key is not an error on its own, but a configuration load fails
//! as a whole if any of its keys is absent, and the caller's defaults stand.

use core::fmt::Write;

use heapless::String;
use log::{info, warn};

use super::design_parameters::NUM_LOADS;
use crate::settings::SysCfg;

/// Persistent storage consumed by the core.
pub trait KvStore {
    fn save_cfg(&mut self, cfg: &SysCfg) -> bool;

    /// Load the persisted configuration into `cfg`. On failure `cfg` is left
    /// untouched.
    fn load_cfg(&mut self, cfg: &mut SysCfg) -> bool;

    fn save_energy(&mut self, kwh: f64) -> bool;

    /// Returns 0.0 if no energy value has ever been persisted.
    fn load_energy(&mut self) -> f64;

    /// Erase everything persisted so the defaults apply on the next boot.
    fn reset_defaults(&mut self) -> bool;
}

/// Raw key/blob storage satisfied by the external flash wrapper.
pub trait BlobStore {
    /// Copy the value stored under `key` into `buf` and return its length,
    /// or `None` if the key is absent.
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Option<usize>;

    fn put(&mut self, key: &str, value: &[u8]) -> bool;

    fn erase_all(&mut self) -> bool;
}

/// The stable persisted layout over a raw blob store.
pub struct KvLayout<S> {
    store: S,
}

impl<S> KvLayout<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

fn load_key(prefix: &str, id: usize) -> String<16> {
    let mut key = String::new();
    // Note(unwrap): prefix and a single-digit id always fit.
    write!(&mut key, "{}_{}", prefix, id).unwrap();
    key
}

impl<S: BlobStore> KvLayout<S> {
    fn get_exact(&mut self, key: &str, buf: &mut [u8]) -> bool {
        self.store.get(key, buf) == Some(buf.len())
    }
}

impl<S: BlobStore> KvStore for KvLayout<S> {
    fn save_cfg(&mut self, cfg: &SysCfg) -> bool {
        let mut ok = self.store.put("imax", &cfg.imax.to_le_bytes());

        for (id, load) in cfg.load.iter().enumerate() {
            ok = ok
                && self
                    .store
                    .put(&load_key("vmin", id), &load.v_min.to_le_bytes())
                && self
                    .store
                    .put(&load_key("vmax", id), &load.v_max.to_le_bytes())
                && self
                    .store
                    .put(&load_key("autorec", id), &[load.auto_rec as u8])
                && self.store.put(&load_key("priority", id), &[load.priority]);
        }

        if ok {
            info!("configuration saved");
        } else {
            warn!("configuration save failed");
        }
        ok
    }

    fn load_cfg(&mut self, cfg: &mut SysCfg) -> bool {
        let mut loaded = SysCfg::default();

        let mut buf4 = [0u8; 4];
        if !self.get_exact("imax", &mut buf4) {
            return false;
        }
        loaded.imax = f32::from_le_bytes(buf4);

        for id in 0..NUM_LOADS {
            let mut buf2 = [0u8; 2];
            let mut buf1 = [0u8; 1];

            if !self.get_exact(&load_key("vmin", id), &mut buf2) {
                return false;
            }
            loaded.load[id].v_min = i16::from_le_bytes(buf2);

            if !self.get_exact(&load_key("vmax", id), &mut buf2) {
                return false;
            }
            loaded.load[id].v_max = i16::from_le_bytes(buf2);

            if !self.get_exact(&load_key("autorec", id), &mut buf1) {
                return false;
            }
            loaded.load[id].auto_rec = buf1[0] != 0;

            if !self.get_exact(&load_key("priority", id), &mut buf1) {
                return false;
            }
            loaded.load[id].priority = buf1[0];
        }

        *cfg = loaded;
        info!("configuration loaded");
        true
    }

    fn save_energy(&mut self, kwh: f64) -> bool {
        self.store.put("energy", &kwh.to_le_bytes())
    }

    fn load_energy(&mut self) -> f64 {
        let mut buf = [0u8; 8];
        if self.get_exact("energy", &mut buf) {
            f64::from_le_bytes(buf)
        } else {
            0.0
        }
    }

    fn reset_defaults(&mut self) -> bool {
        self.store.erase_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::string::String as StdString;
    use std::vec::Vec;

    #[derive(Default)]
    struct MemStore(HashMap<StdString, Vec<u8>>);

    impl BlobStore for MemStore {
        fn get(&mut self, key: &str, buf: &mut [u8]) -> Option<usize> {
            let value = self.0.get(key)?;
            let n = value.len().min(buf.len());
            buf[..n].copy_from_slice(&value[..n]);
            Some(value.len())
        }

        fn put(&mut self, key: &str, value: &[u8]) -> bool {
            self.0.insert(key.into(), value.into());
            true
        }

        fn erase_all(&mut self) -> bool {
            self.0.clear();
            true
        }
    }

    #[test]
    fn config_round_trip_is_byte_equal() {
        let mut kv = KvLayout::new(MemStore::default());

        let mut cfg = SysCfg::default();
        cfg.imax = 3.5;
        cfg.load[1].v_min = -1;
        cfg.load[1].v_max = 260;
        cfg.load[2].auto_rec = false;
        cfg.load[3].priority = 9;
        assert!(kv.save_cfg(&cfg));

        let mut restored = SysCfg::default();
        assert!(kv.load_cfg(&mut restored));
        assert_eq!(restored, cfg);
    }

    #[test]
    fn missing_key_fails_whole_load_and_defaults_stand() {
        let mut kv = KvLayout::new(MemStore::default());

        let cfg = SysCfg::default();
        assert!(kv.save_cfg(&cfg));
        kv.store.0.remove("vmax_2");

        let mut out = SysCfg::default();
        out.imax = 9.0;
        assert!(!kv.load_cfg(&mut out));
        assert_eq!(out.imax, 9.0);
    }

    #[test]
    fn absent_energy_reads_as_zero() {
        let mut kv = KvLayout::new(MemStore::default());
        assert_eq!(kv.load_energy(), 0.0);

        assert!(kv.save_energy(12.625));
        assert_eq!(kv.load_energy(), 12.625);
    }

    #[test]
    fn reset_defaults_erases_everything() {
        let mut kv = KvLayout::new(MemStore::default());
        assert!(kv.save_cfg(&SysCfg::default()));
        assert!(kv.save_energy(1.0));

        assert!(kv.reset_defaults());
        assert_eq!(kv.load_energy(), 0.0);
        let mut out = SysCfg::default();
        assert!(!kv.load_cfg(&mut out));
    }
}
