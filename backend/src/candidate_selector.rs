// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic quorum selection: two callers seeding with the same value
//! over the same online set must pick identical candidates, so that
//! independent clients racing to drive a key-epoch rotation agree on who is
//! supposed to do it without talking to each other first.

use std::collections::HashSet;

use glkdc_common::identifiers::{Address, DeviceKind};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Picks up to `count` distinct master-device addresses out of `online`.
/// Seeded with the next key-epoch `version`, per the coordinator's use of
/// `seed = nextVersion`.
pub fn select(online: &[Address], seed: u64, count: usize) -> HashSet<Address> {
    let masters: Vec<&Address> = online
        .iter()
        .filter(|a| a.kind == DeviceKind::Master)
        .collect();

    if masters.len() <= count {
        return masters.into_iter().cloned().collect();
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let start = rng.gen_range(0..masters.len());

    let mut chosen = HashSet::new();
    let mut i = start;
    while chosen.len() < count {
        chosen.insert(masters[i].clone());
        i = (i + 1) % masters.len();
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use glkdc_common::identifiers::{DeviceId, Uid};

    fn address(n: u32, kind: DeviceKind) -> Address {
        Address {
            uid: Uid::from_public_key(&n.to_be_bytes()),
            device_id: DeviceId(n),
            kind,
        }
    }

    #[test]
    fn returns_everyone_when_online_set_fits_within_count() {
        let online = vec![
            address(1, DeviceKind::Master),
            address(2, DeviceKind::Master),
        ];
        let chosen = select(&online, 42, 5);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn same_seed_and_online_set_picks_the_same_quorum() {
        let online: Vec<Address> = (0..20).map(|n| address(n, DeviceKind::Master)).collect();
        let first = select(&online, 7, 5);
        let second = select(&online, 7, 5);
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn ignores_linked_devices() {
        let online = vec![
            address(1, DeviceKind::Linked),
            address(2, DeviceKind::Master),
            address(3, DeviceKind::Linked),
        ];
        let chosen = select(&online, 1, 5);
        assert_eq!(chosen.len(), 1);
        assert!(chosen.contains(&address(2, DeviceKind::Master)));
    }
}
