//! Reduction of record sequences to the strongest signals.

use super::schema::VariantRecord;

/// Number of slots of `TopSignals`.
pub const TOP_K: usize = 10;

/// PIP floor of the first slot, slot `i` starts at `(i + 1)` times this.
pub const PIP_FLOOR: f64 = 1e-6;

/// Whether `candidate` beats `incumbent`: higher PIP, then lower p-value.
/// Full ties keep the incumbent, so the first record seen wins.
fn is_better(candidate: &VariantRecord, incumbent: &VariantRecord) -> bool {
    let (pip_c, pip_i) = (candidate.pip(), incumbent.pip());
    pip_c > pip_i || (pip_c == pip_i && candidate.log_pvalue > incumbent.log_pvalue)
}

/// Streaming selection of the single strongest record.
#[derive(Debug, Default)]
pub struct BestVariant {
    best: Option<VariantRecord>,
}

impl BestVariant {
    pub fn push(&mut self, record: VariantRecord) {
        match &self.best {
            Some(best) if !is_better(&record, best) => (),
            _ => self.best = Some(record),
        }
    }

    pub fn finish(self) -> Option<VariantRecord> {
        self.best
    }
}

/// The strongest record of `records`, see `BestVariant`.
pub fn best_variant<I: IntoIterator<Item = VariantRecord>>(records: I) -> Option<VariantRecord> {
    let mut best = BestVariant::default();
    records.into_iter().for_each(|record| best.push(record));
    best.finish()
}

/// Identity of an independent signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub tissue: String,
    pub gene_id: String,
    pub cluster: String,
}

impl SignalKey {
    pub fn of(record: &VariantRecord) -> Self {
        Self {
            tissue: record.tissue.clone(),
            gene_id: record.gene_id.clone(),
            cluster: record.cluster().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    /// `None` while the slot holds its floor.
    key: Option<SignalKey>,
    pip: f64,
    record: Option<VariantRecord>,
}

/// Streaming selection of the `TOP_K` strongest independent signals.
///
/// Records of the same `(tissue, gene, cluster)` compete for one slot, so a
/// credible set of correlated variants occupies at most one.
#[derive(Debug, Clone)]
pub struct TopSignals {
    slots: Vec<Slot>,
    /// Index of the slot with the lowest PIP.
    min_idx: usize,
}

impl Default for TopSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl TopSignals {
    pub fn new() -> Self {
        let slots = (1..=TOP_K)
            .map(|i| Slot {
                key: None,
                pip: i as f64 * PIP_FLOOR,
                record: None,
            })
            .collect();
        Self { slots, min_idx: 0 }
    }

    fn update_min(&mut self) {
        let mut min_idx = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.pip < self.slots[min_idx].pip {
                min_idx = i;
            }
        }
        self.min_idx = min_idx;
    }

    /// Lowest PIP in the working set.
    pub fn min_pip(&self) -> f64 {
        self.slots[self.min_idx].pip
    }

    pub fn push(&mut self, record: VariantRecord) {
        let key = SignalKey::of(&record);
        let pip = record.pip();

        let existing = self
            .slots
            .iter()
            .position(|slot| slot.key.as_ref() == Some(&key));
        match existing {
            Some(idx) => {
                if pip > self.slots[idx].pip {
                    self.slots[idx].pip = pip;
                    self.slots[idx].record = Some(record);
                    self.update_min();
                }
            }
            None => {
                if pip > self.min_pip() {
                    self.slots[self.min_idx] = Slot {
                        key: Some(key),
                        pip,
                        record: Some(record),
                    };
                    self.update_min();
                }
            }
        }
    }

    /// Number of slots holding a record.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The selected records, by PIP descending.
    pub fn finish(self) -> Vec<VariantRecord> {
        let mut slots = self
            .slots
            .into_iter()
            .filter_map(|slot| slot.record.map(|record| (slot.pip, record)))
            .collect::<Vec<_>>();
        slots.sort_by(|a, b| b.0.total_cmp(&a.0));
        slots.into_iter().map(|(_, record)| record).collect()
    }
}

/// The top signals of `records`, see `TopSignals`.
pub fn top_signals<I: IntoIterator<Item = VariantRecord>>(records: I) -> Vec<VariantRecord> {
    let mut top = TopSignals::new();
    records.into_iter().for_each(|record| top.push(record));
    top.finish()
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::query::schema::{test::record, Finemap};

    fn annotated(tissue: &str, gene_id: &str, pos: u64, cluster: &str, pip: f64) -> VariantRecord {
        let mut rec = record(tissue, gene_id, pos);
        rec.finemap = Some(Finemap {
            cluster: cluster.into(),
            cs_size: 1,
            pip,
        });
        rec
    }

    #[test]
    fn best_variant_max_pip() {
        let best = best_variant(vec![
            annotated("liver", "G1", 1, "1", 0.2),
            annotated("lung", "G1", 2, "1", 0.9),
            annotated("liver", "G2", 3, "2", 0.5),
        ]);
        assert_eq!(Some(2), best.map(|r| r.coordinate.pos));
    }

    #[test]
    fn best_variant_ties() {
        let mut weaker = annotated("liver", "G1", 1, "1", 0.5);
        weaker.log_pvalue = 5.0;
        let mut stronger = annotated("liver", "G1", 2, "1", 0.5);
        stronger.log_pvalue = 9.0;
        let mut also_stronger = annotated("liver", "G1", 3, "1", 0.5);
        also_stronger.log_pvalue = 9.0;

        let best = best_variant(vec![weaker.clone(), stronger.clone(), also_stronger.clone()]);
        assert_eq!(Some(2), best.map(|r| r.coordinate.pos));
        let best = best_variant(vec![also_stronger, weaker, stronger]);
        assert_eq!(Some(3), best.map(|r| r.coordinate.pos));
    }

    #[test]
    fn best_variant_empty_and_unannotated() {
        assert_eq!(None, best_variant(Vec::new()));
        let best = best_variant(vec![record("liver", "G1", 1), record("liver", "G1", 2)]);
        assert_eq!(Some(1), best.map(|r| r.coordinate.pos));
    }

    #[test]
    fn top_signals_one_slot_per_cluster() {
        let top = top_signals(vec![
            annotated("liver", "G1", 1, "1", 0.2),
            annotated("liver", "G1", 2, "1", 0.7),
            annotated("liver", "G1", 3, "1", 0.4),
            annotated("liver", "G1", 4, "2", 0.3),
            annotated("lung", "G1", 5, "1", 0.1),
        ]);
        assert_eq!(
            vec![2, 4, 5],
            top.iter().map(|r| r.coordinate.pos).collect::<Vec<_>>()
        );
    }

    #[test]
    fn top_signals_floor() {
        let mut top = TopSignals::new();
        assert!(top.is_empty());
        assert_eq!(PIP_FLOOR, top.min_pip());
        top.push(annotated("liver", "G1", 1, "1", 0.0));
        top.push(record("liver", "G1", 1));
        top.push(annotated("liver", "G1", 1, "1", 1e-7));
        assert!(top.is_empty());
        top.push(annotated("liver", "G1", 1, "1", 1.5e-6));
        assert_eq!(1, top.len());
        assert_eq!(2e-6, top.min_pip());
    }

    #[test]
    fn top_signals_evicts_minimum() {
        let mut top = TopSignals::new();
        for i in 0..12u64 {
            top.push(annotated("liver", &format!("G{}", i), i, "1", 0.1 + i as f64 * 0.01));
        }
        let result = top.finish();
        assert_eq!(TOP_K, result.len());
        assert_eq!(
            (2..12).rev().collect::<Vec<_>>(),
            result.iter().map(|r| r.coordinate.pos).collect::<Vec<_>>()
        );
    }

    #[test]
    fn top_signals_invariants() {
        // Deterministic linear congruential generator for a long mixed stream.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            state >> 33
        };

        let mut top = TopSignals::new();
        let mut max_per_key = std::collections::HashMap::new();
        for pos in 0..2000u64 {
            let tissue = ["liver", "lung", "skin"][(next() % 3) as usize];
            let gene = format!("G{}", next() % 5);
            let cluster = format!("{}", next() % 4);
            let pip = (next() % 1000) as f64 / 1000.0;
            let rec = annotated(tissue, &gene, pos, &cluster, pip);
            let key = SignalKey::of(&rec);
            let entry = max_per_key.entry(key).or_insert(0.0f64);
            *entry = entry.max(pip);
            top.push(rec);

            assert!(top.len() <= TOP_K);
            let min_pip = top.min_pip();
            assert!(top.slots.iter().all(|slot| slot.pip >= min_pip));
            let keys = top
                .slots
                .iter()
                .filter_map(|slot| slot.key.clone())
                .collect::<Vec<_>>();
            assert_eq!(keys.len(), keys.iter().collect::<HashSet<_>>().len());
        }

        // The selected signals are the ten keys with the highest PIP.
        let mut expected = max_per_key.values().copied().collect::<Vec<_>>();
        expected.sort_by(|a, b| b.total_cmp(a));
        expected.truncate(TOP_K);
        let actual = top.finish().iter().map(|r| r.pip()).collect::<Vec<_>>();
        assert_eq!(expected, actual);
    }
}
