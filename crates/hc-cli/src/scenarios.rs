//! Registered regression scenarios.
//!
//! Each scenario builds a fresh deployment from the effective configuration
//! (overriding only what it must) on a manual clock, drives it through the
//! public client API and checks the observable outcome.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, ensure, Context};
use hc_client::{
    Attributes, AttrValue, ClientError, ClientResult, Clock, Honeycomb, HoneycombConfig, ManualClock,
    MetadataOid, QueryIntegrityTime, RetryPolicy,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

type ScenarioFn = fn(&HoneycombConfig) -> anyhow::Result<String>;

#[derive(Debug)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    run: ScenarioFn,
}

/// Result of one scenario run.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

pub static SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "delete-metadata-chain",
        description: "m2, m3 from m1; delete m1, m2; m3 survives until deleted",
        run: delete_metadata_chain,
    },
    Scenario {
        name: "long-metadata-chain",
        description: "chain of ten links, each deleting its predecessor",
        run: long_metadata_chain,
    },
    Scenario {
        name: "complex-chains",
        description: "branching metadata tree deleted in random order",
        run: complex_chains,
    },
    Scenario {
        name: "double-delete",
        description: "second delete of the same object is NoSuchObject",
        run: double_delete,
    },
    Scenario {
        name: "delete-hides-from-query",
        description: "deleted objects drop out of query results",
        run: delete_hides_from_query,
    },
    Scenario {
        name: "store-retrieve-digest",
        description: "random payloads come back with their stored digest",
        run: store_retrieve_digest,
    },
    Scenario {
        name: "concurrent-add-metadata",
        description: "parallel addMetadata keeps the refcount exact",
        run: concurrent_add_metadata,
    },
    Scenario {
        name: "delete-vs-add-race",
        description: "delete racing addMetadata has exactly one consistent winner",
        run: delete_vs_add_race,
    },
    Scenario {
        name: "fragment-loss",
        description: "reads survive up to the parity budget of lost fragments",
        run: fragment_loss,
    },
    Scenario {
        name: "transient-io-retry",
        description: "transient write and read faults are retried away",
        run: transient_io_retry,
    },
    Scenario {
        name: "watermark-wipe-and-reindex",
        description: "QIT is non-increasing, 0 after wipe, advancing after reindex",
        run: watermark_wipe_and_reindex,
    },
    Scenario {
        name: "multicell-query",
        description: "queries merge cells in OID order under the minimum QIT",
        run: multicell_query,
    },
    Scenario {
        name: "dedup-store",
        description: "identical bytes share one data object, revived after reclamation",
        run: dedup_store,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

impl Scenario {
    pub fn run(&self, config: &HoneycombConfig) -> Outcome {
        info!(scenario = self.name, "running");
        let started = Instant::now();
        let result = (self.run)(config);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(detail) => Outcome {
                name: self.name,
                passed: true,
                detail,
                elapsed_ms,
            },
            Err(e) => Outcome {
                name: self.name,
                passed: false,
                detail: format!("{e:#}"),
                elapsed_ms,
            },
        }
    }
}

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

const START_MS: u64 = 1_000;

fn deploy(config: &HoneycombConfig) -> anyhow::Result<(Arc<ManualClock>, Honeycomb)> {
    let clock = Arc::new(ManualClock::new(START_MS));
    let hc = Honeycomb::with_clock(config.clone(), clock.clone())?;
    Ok((clock, hc))
}

fn single_cell(config: &HoneycombConfig) -> HoneycombConfig {
    HoneycombConfig {
        cells: 1,
        ..config.clone()
    }
}

fn payload(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill(&mut buf[..]);
    buf
}

fn tagged(tag: &str, n: i64) -> Attributes {
    let mut a = Attributes::new();
    a.insert("tag".into(), AttrValue::from(tag));
    a.insert("n".into(), AttrValue::Long(n));
    a
}

/// The object must no longer be retrievable.
fn expect_gone<T>(result: ClientResult<T>, what: &str) -> anyhow::Result<()> {
    match result {
        Err(ClientError::NoSuchObject(_) | ClientError::DataUnavailable(_)) => Ok(()),
        Ok(_) => bail!("{what} is still retrievable"),
        Err(e) => bail!("{what}: unexpected error: {e}"),
    }
}

fn expect_no_such_object<T>(result: ClientResult<T>, what: &str) -> anyhow::Result<()> {
    match result {
        Err(ClientError::NoSuchObject(_)) => Ok(()),
        Ok(_) => bail!("{what} unexpectedly succeeded"),
        Err(e) => bail!("{what}: expected NoSuchObject, got {e}"),
    }
}

fn expect_clean_audit(hc: &Honeycomb) -> anyhow::Result<()> {
    let audit = hc.audit();
    ensure!(
        audit.is_clean(),
        "refcount audit found {} mismatches over {} data objects",
        audit.mismatches.len(),
        audit.checked
    );
    Ok(())
}

fn query_oids(hc: &Honeycomb, predicate: &str) -> anyhow::Result<Vec<MetadataOid>> {
    Ok(hc
        .query(predicate, 16)?
        .collect_all()
        .into_iter()
        .map(|row| row.oid)
        .collect())
}

// ---------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------

fn delete_metadata_chain(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(config)?;
    let data = payload(4_096);
    let m1 = hc.store(&data, Attributes::new())?;
    let m2 = hc.add_metadata(&m1.md_oid, Attributes::new())?;
    let m3 = hc.add_metadata(&m1.md_oid, Attributes::new())?;
    ensure!(hc.ref_count(&m1.data_oid) == Some(3), "refcount after two adds");

    hc.delete(&m1.md_oid)?;
    hc.delete(&m2)?;
    ensure!(hc.retrieve(&m3)? == data, "m3 returned different bytes");

    hc.delete(&m3)?;
    expect_gone(hc.retrieve(&m3), "m3")?;
    expect_gone(hc.retrieve_data(&m1.data_oid), "data object")?;
    expect_clean_audit(&hc)?;
    Ok("m3 outlived m1 and m2; data unreachable after last delete".into())
}

fn long_metadata_chain(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(config)?;
    let data = payload(1_024);
    let first = hc.store(&data, Attributes::new())?;
    let mut links = vec![first.md_oid];
    for i in 2..=10 {
        let prev = links[links.len() - 1];
        let next = hc
            .add_metadata(&prev, Attributes::new())
            .with_context(|| format!("adding m{i}"))?;
        hc.delete(&prev)?;
        links.push(next);
    }
    for (i, link) in links[..9].iter().enumerate() {
        expect_gone(hc.retrieve(link), &format!("m{}", i + 1))?;
    }
    let m10 = links[9];
    ensure!(hc.retrieve(&m10)? == data, "m10 returned different bytes");
    ensure!(hc.ref_count(&first.data_oid) == Some(1), "refcount of m10's data");

    hc.delete(&m10)?;
    expect_gone(hc.retrieve_data(&first.data_oid), "data object")?;
    expect_clean_audit(&hc)?;
    Ok("only m10 survived; data unreachable after it".into())
}

fn complex_chains(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(config)?;
    let data = payload(2_048);
    let root = hc.store(&data, Attributes::new())?;

    // Grow a tree: every new object is added from a random live one.
    let mut live = vec![root.md_oid];
    let mut rng = rand::thread_rng();
    for _ in 0..15 {
        let parent = *live.choose(&mut rng).ok_or_else(|| anyhow!("empty tree"))?;
        live.push(hc.add_metadata(&parent, Attributes::new())?);
    }
    live.shuffle(&mut rng);

    while let Some(victim) = live.pop() {
        hc.delete(&victim)?;
        expect_gone(hc.retrieve(&victim), "deleted object")?;
        for sibling in &live {
            ensure!(hc.retrieve(sibling)? == data, "sibling lost its data");
        }
        if !live.is_empty() {
            ensure!(
                hc.ref_count(&root.data_oid) == Some(live.len() as u32),
                "refcount drifted with {} live objects",
                live.len()
            );
        }
        expect_clean_audit(&hc)?;
    }
    expect_gone(hc.retrieve_data(&root.data_oid), "data object")?;
    Ok("16 objects deleted in random order".into())
}

fn double_delete(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(config)?;
    let r = hc.store(&payload(256), Attributes::new())?;
    hc.delete(&r.md_oid)?;
    expect_no_such_object(hc.delete(&r.md_oid), "second delete")?;
    expect_no_such_object(hc.add_metadata(&r.md_oid, Attributes::new()), "add from deleted")?;
    expect_gone(hc.retrieve(&r.md_oid), "deleted object")?;
    expect_clean_audit(&hc)?;
    Ok("second delete rejected".into())
}

fn delete_hides_from_query(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (clock, hc) = deploy(config)?;
    let keep = hc.store(&payload(64), tagged("hide", 1))?;
    let drop = hc.store(&payload(64), tagged("hide", 2))?;
    clock.advance(10);
    hc.run_index_cycle();

    let mut before = query_oids(&hc, "tag = 'hide'")?;
    let mut expected = vec![keep.md_oid, drop.md_oid];
    before.sort();
    expected.sort();
    ensure!(before == expected, "both objects should be visible before delete");

    hc.delete(&drop.md_oid)?;
    ensure!(
        !hc.check_indexed(&drop.md_oid).is_established(),
        "deleted object still reported as indexed"
    );
    clock.advance(10);
    hc.run_index_cycle();
    let after = query_oids(&hc, "tag = 'hide'")?;
    ensure!(after == vec![keep.md_oid], "deleted object still in results");
    Ok("deleted object excluded after one cycle".into())
}

fn store_retrieve_digest(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(config)?;
    let sizes = [0usize, 1, 17, 4_096, 65_537];
    for size in sizes {
        let data = payload(size);
        let r = hc.store(&data, Attributes::new())?;
        ensure!(r.size == size as u64, "receipt size {} for {size} bytes", r.size);
        let back = hc.retrieve(&r.md_oid)?;
        ensure!(r.digest.matches(&back), "digest mismatch for {size} bytes");
        ensure!(back == data, "bytes differ for {size} bytes");
    }
    Ok(format!("{} payloads verified", sizes.len()))
}

fn concurrent_add_metadata(config: &HoneycombConfig) -> anyhow::Result<String> {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;
    let (_, hc) = deploy(config)?;
    let root = hc.store(&payload(512), Attributes::new())?;

    let results: Vec<ClientResult<Vec<MetadataOid>>> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..PER_THREAD)
                        .map(|_| hc.add_metadata(&root.md_oid, Attributes::new()))
                        .collect::<ClientResult<Vec<MetadataOid>>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or_else(|_| Err(ClientError::Io("worker panicked".into()))))
            .collect()
    });
    let mut added = 0;
    for result in results {
        added += result?.len();
    }

    let expected = (THREADS * PER_THREAD + 1) as u32;
    ensure!(
        hc.ref_count(&root.data_oid) == Some(expected),
        "refcount {:?}, expected {expected}",
        hc.ref_count(&root.data_oid)
    );
    expect_clean_audit(&hc)?;
    Ok(format!("{added} concurrent adds, refcount {expected}"))
}

fn delete_vs_add_race(config: &HoneycombConfig) -> anyhow::Result<String> {
    const ROUNDS: usize = 50;
    let (_, hc) = deploy(config)?;
    let mut add_won = 0;
    for round in 0..ROUNDS {
        let r = hc.store(&payload(128), Attributes::new())?;
        let (deleted, added) = thread::scope(|s| {
            let d = s.spawn(|| hc.delete(&r.md_oid));
            let a = s.spawn(|| hc.add_metadata(&r.md_oid, Attributes::new()));
            (d.join(), a.join())
        });
        deleted
            .map_err(|_| anyhow!("delete thread panicked"))?
            .with_context(|| format!("round {round}: delete"))?;
        match added.map_err(|_| anyhow!("add thread panicked"))? {
            Ok(child) => {
                add_won += 1;
                ensure!(hc.retrieve(&child).is_ok(), "round {round}: child lost its data");
                ensure!(hc.ref_count(&r.data_oid) == Some(1), "round {round}: refcount");
                hc.delete(&child)?;
            }
            Err(ClientError::NoSuchObject(_)) => {
                expect_gone(hc.retrieve_data(&r.data_oid), "data after losing add")?;
            }
            Err(e) => bail!("round {round}: add failed with {e}"),
        }
        expect_gone(hc.retrieve(&r.md_oid), "deleted parent")?;
    }
    expect_clean_audit(&hc)?;
    debug!(add_won, rounds = ROUNDS, "race outcomes");
    Ok(format!("{ROUNDS} rounds, add won {add_won}"))
}

fn fragment_loss(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(&single_cell(config))?;
    let cell = hc.cell(0).ok_or_else(|| anyhow!("no cell 0"))?;
    let parity = cell.blobs().layout().parity_fragments;
    let data = payload(8_192);

    let doomed = hc.store(&data, Attributes::new())?;
    for index in 0..parity {
        cell.blobs().lose_fragment(&doomed.data_oid, index)?;
    }
    ensure!(hc.retrieve(&doomed.md_oid)? == data, "read failed within parity budget");
    cell.blobs().lose_fragment(&doomed.data_oid, parity)?;
    match hc.retrieve(&doomed.md_oid) {
        Err(ClientError::DataUnavailable(_)) => {}
        other => bail!("expected DataUnavailable past parity, got {:?}", other.map(|b| b.len())),
    }

    if parity > 0 {
        let healed = hc.store(&payload(1_024), Attributes::new())?;
        cell.blobs().corrupt_fragment(&healed.data_oid, 0)?;
        let repaired = cell.blobs().repair(&healed.data_oid)?;
        ensure!(repaired == 1, "repaired {repaired} fragments, expected 1");
        hc.retrieve(&healed.md_oid)?;
    }
    Ok(format!("tolerated {parity} lost fragments, failed at {}", parity + 1))
}

fn transient_io_retry(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(&single_cell(config))?;
    let faults = hc.faults(0).ok_or_else(|| anyhow!("no cell 0"))?;
    let policy = RetryPolicy {
        max_attempts: hc.retry_policy().max_attempts.max(3),
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        multiplier: 2.0,
    };
    let data = payload(300);

    faults.fail_next_writes(2);
    let r = policy.with_retry(|| hc.store(&data, Attributes::new()))?;
    faults.fail_next_reads(2);
    let back = policy.with_retry(|| hc.retrieve(&r.md_oid))?;
    ensure!(back == data, "retried read returned different bytes");

    faults.fail_next_reads(1);
    match RetryPolicy::none().with_retry(|| hc.retrieve(&r.md_oid)) {
        Err(e) if e.is_transient() => {}
        other => bail!("single attempt should surface Io, got {:?}", other.map(|b| b.len())),
    }
    expect_clean_audit(&hc)?;
    Ok(format!("recovered within {} attempts", policy.max_attempts))
}

fn watermark_wipe_and_reindex(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (clock, hc) = deploy(config)?;
    let stored: Vec<MetadataOid> = (0..20)
        .map(|n| hc.store(&payload(32), tagged("wm", n)).map(|r| r.md_oid))
        .collect::<ClientResult<_>>()?;
    clock.advance(10);
    hc.run_index_cycle();
    let established = hc.watermark();
    ensure!(established.is_established(), "watermark not established");

    // Pages keep a non-increasing QIT while the index keeps advancing.
    let mut cursor = hc.query("tag = 'wm'", 5)?;
    let mut last: Option<QueryIntegrityTime> = None;
    let mut rows = 0;
    while !cursor.is_exhausted() {
        let page = cursor.next_page();
        rows += page.len();
        if let Some(row) = page.first() {
            if let Some(prev) = last {
                ensure!(row.query_integrity_time <= prev, "QIT increased within a cursor");
            }
            last = Some(row.query_integrity_time);
        }
        clock.advance(5);
        hc.run_index_cycle();
    }
    ensure!(rows == stored.len(), "cursor returned {rows} rows");

    hc.wipe_index();
    ensure!(hc.watermark() == QueryIntegrityTime::zero(), "QIT not zero after wipe");
    ensure!(
        !hc.check_indexed(&stored[0]).is_established(),
        "object indexed after wipe"
    );

    clock.advance(10);
    let report = hc.repopulate_index();
    ensure!(report.watermark > established, "QIT did not advance after reindex");
    ensure!(query_oids(&hc, "tag = 'wm'")?.len() == stored.len(), "rows missing after reindex");

    hc.reboot();
    ensure!(hc.watermark() == QueryIntegrityTime::zero(), "QIT not zero after reboot");
    clock.advance(10);
    let report = hc.repopulate_index();
    ensure!(report.watermark.is_established(), "QIT not re-established after reboot");
    Ok(format!("watermark {established} -> 0 -> {}", report.watermark))
}

fn multicell_query(config: &HoneycombConfig) -> anyhow::Result<String> {
    let cells = config.cells.max(3);
    let (clock, hc) = deploy(&HoneycombConfig {
        cells,
        ..config.clone()
    })?;
    let mut expected: Vec<MetadataOid> = (0..30)
        .map(|n| hc.store(&payload(16), tagged("mc", n)).map(|r| r.md_oid))
        .collect::<ClientResult<_>>()?;
    expected.sort();
    clock.advance(10);
    hc.run_index_cycle();

    // Let one cell run ahead; results must report the laggard's QIT.
    let floor = hc.watermark();
    clock.advance(50);
    if let Some(cell) = hc.cell(0) {
        cell.index().run_cycle(cell.chain().fence(clock.now_ms()));
    }
    let rows = hc.query("tag = 'mc' AND n >= 0", 7)?.collect_all();
    let oids: Vec<MetadataOid> = rows.iter().map(|r| r.oid).collect();
    ensure!(oids == expected, "merged results out of order or incomplete");
    ensure!(
        rows.iter().all(|r| r.query_integrity_time == floor),
        "QIT is not the minimum across cells"
    );

    let upper = query_oids(&hc, "tag = 'mc' AND NOT n < 15")?;
    ensure!(upper.len() == 15, "NOT predicate returned {} rows", upper.len());
    Ok(format!("{} rows merged from {cells} cells at QIT {floor}", oids.len()))
}

fn dedup_store(config: &HoneycombConfig) -> anyhow::Result<String> {
    let (_, hc) = deploy(&single_cell(config))?;
    let data = payload(1_000);
    let a = hc.store(&data, Attributes::new())?;
    let b = hc.store(&data, Attributes::new())?;
    ensure!(a.data_oid == b.data_oid, "identical bytes produced two data objects");
    ensure!(a.md_oid != b.md_oid, "two stores shared a metadata OID");
    ensure!(hc.ref_count(&a.data_oid) == Some(2), "refcount after dedup");

    hc.delete(&a.md_oid)?;
    ensure!(hc.retrieve(&b.md_oid)? == data, "survivor lost its data");
    hc.delete(&b.md_oid)?;
    expect_gone(hc.retrieve_data(&a.data_oid), "data object")?;

    let c = hc.store(&data, Attributes::new())?;
    ensure!(c.data_oid == a.data_oid, "re-store changed the data OID");
    ensure!(hc.ref_count(&c.data_oid) == Some(1), "revived refcount");
    ensure!(hc.retrieve(&c.md_oid)? == data, "revived data differs");
    expect_clean_audit(&hc)?;
    Ok("two stores shared one data object; revived after reclamation".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = SCENARIOS.iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), SCENARIOS.len());
        assert_eq!(SCENARIOS.len(), 13);
    }

    #[test]
    fn find_by_name() {
        assert!(find("dedup-store").is_some());
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn every_scenario_passes_on_defaults() {
        let config = HoneycombConfig::default();
        for scenario in SCENARIOS {
            let outcome = scenario.run(&config);
            assert!(outcome.passed, "{}: {}", outcome.name, outcome.detail);
        }
    }

    #[test]
    fn every_scenario_passes_on_three_cells() {
        let config = HoneycombConfig {
            cells: 3,
            shards_per_cell: 2,
            ..Default::default()
        };
        for scenario in SCENARIOS {
            let outcome = scenario.run(&config);
            assert!(outcome.passed, "{}: {}", outcome.name, outcome.detail);
        }
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let scenario = Scenario {
            name: "always-fails",
            description: "",
            run: |_| Err(anyhow!("boom")),
        };
        let outcome = scenario.run(&HoneycombConfig::default());
        assert!(!outcome.passed);
        assert_eq!(outcome.detail, "boom");
    }
}
