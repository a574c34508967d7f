use std::{collections::HashSet, thread::scope};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    Coder, CoderGenerator, Context, Counter, CounterGenerator, DocumentStore, Error, Fields,
    FixedClock, Level, MIN_COUNTER_SHARDS, MemoryStore, MemoryStoreConfig, ProtocolViolation,
    ScriptedRandom, Serial, SerialGenerator, StoreError, Transaction, Value, decode_code,
    decode_code16, decode_code64,
};

fn patient_store() -> MemoryStore {
    MemoryStore::new(MemoryStoreConfig {
        max_attempts: 10_000,
        ..MemoryStoreConfig::default()
    })
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
}

fn run_serial<G: SerialGenerator<MemoryStore>>(generator: &mut G, ctx: &Context) -> Vec<u64> {
    (0..3).map(|_| generator.number(ctx).unwrap()).collect()
}

#[test]
fn serial_counts_from_one() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(store.clone(), "serials", "invoices");

    assert_eq!(serial.current(&ctx).unwrap(), 0);
    assert_eq!(run_serial(&mut serial, &ctx), [1, 2, 3]);
    assert_eq!(serial.current(&ctx).unwrap(), 3);
}

#[test]
fn serial_restarts_after_delete() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "invoices");

    serial.number(&ctx).unwrap();
    serial.number(&ctx).unwrap();
    serial.delete(&ctx).unwrap();
    serial.delete(&ctx).unwrap();
    assert!(store.is_empty());
    assert_eq!(serial.number(&ctx).unwrap(), 1);
}

#[test]
fn serial_rejects_double_read() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "invoices");

    let mut tx = store.begin().unwrap();
    assert_eq!(serial.number_rx(&ctx, &mut tx).unwrap(), 1);
    let err = serial.number_rx(&ctx, &mut tx).unwrap_err();
    assert_eq!(err.violation(), Some(ProtocolViolation::ReadAlreadyPending));

    assert_eq!(serial.number_wx(&ctx, &mut tx).unwrap(), 1);
    store.commit(&mut tx).unwrap();
    assert_eq!(serial.current(&ctx).unwrap(), 1);
}

#[test]
fn serial_is_retried_when_another_writer_wins() {
    let store = patient_store();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "invoices");
    let mut rival = Serial::new(&store, "serials", "invoices");
    let mut runs = 0;

    let issued = store
        .run_transaction(&ctx, |tx| {
            runs += 1;
            let value = serial.number_rx(&ctx, tx)?;
            if runs == 1 {
                assert_eq!(rival.number(&ctx)?, 1);
            }
            serial.number_wx(&ctx, tx)?;
            Ok(value)
        })
        .unwrap();

    assert_eq!(runs, 2);
    assert_eq!(issued, 2);
    assert_eq!(serial.current(&ctx).unwrap(), 2);
}

#[test]
fn serial_stays_strictly_increasing_under_contention() {
    let store = patient_store();
    let ctx = Context::background();

    let issued: Vec<u64> = scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut serial = Serial::new(&store, "serials", "tickets");
                    (0..5).map(|_| serial.number(&ctx).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = issued.iter().copied().collect();
    assert_eq!(unique, (1..=20).collect());
}

#[test]
fn write_without_read_writes_nothing() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "a");
    let mut coder = Coder::new(&store, "codes", "a", 4);
    let mut counter = Counter::new(&store, "counters", "a", 10);

    let mut tx = store.begin().unwrap();
    for err in [
        serial.number_wx(&ctx, &mut tx).unwrap_err(),
        coder.number_wx(&ctx, &mut tx).unwrap_err(),
        counter.increment_wx(&ctx, &mut tx, 1).unwrap_err(),
    ] {
        assert_eq!(err.violation(), Some(ProtocolViolation::WriteWithoutRead));
    }
    store.commit(&mut tx).unwrap();
    assert!(store.is_empty());
}

#[test]
fn read_outside_transaction_fails() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "a");
    let mut coder = Coder::new(&store, "codes", "a", 4);
    let mut counter = Counter::new(&store, "counters", "a", 10);

    let mut tx = store.begin().unwrap();
    store.commit(&mut tx).unwrap();
    for err in [
        serial.number_rx(&ctx, &mut tx).unwrap_err(),
        coder.number_rx(&ctx, &mut tx).unwrap_err(),
        counter.increment_rx(&ctx, &mut tx).unwrap_err(),
    ] {
        assert_eq!(err.violation(), Some(ProtocolViolation::ReadOutsideTransaction));
    }
}

#[test]
fn commit_failures_carry_the_shard_set() {
    let store = MemoryStore::new(MemoryStoreConfig {
        max_batch_size: 1,
        ..MemoryStoreConfig::default()
    });
    let ctx = Context::background();

    // A first issue writes both the shard and the container.
    let mut coder = Coder::with_rng(&store, "codes", "orders", 10, ScriptedRandom::new([3]));
    let err = coder.number(&ctx).unwrap_err();
    assert!(matches!(
        &err,
        Error::Store {
            collection,
            id,
            source: StoreError::BatchTooLarge { len: 2, max: 1 },
        } if collection == "codes" && id == "orders"
    ));
    assert!(err.to_string().starts_with("codes/orders: "));

    let mut counter = Counter::new(&store, "counters", "views", 10);
    assert!(matches!(
        counter.increment(&ctx, 1),
        Err(Error::Store { id, .. }) if id == "views"
    ));
    assert!(store.is_empty());
}

#[test]
fn serial_commit_failure_carries_the_shard_set() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "broken");

    let mut fields = Fields::new();
    fields.insert("N".to_owned(), Value::from("not a number"));
    let container = serial.shard_set().container();
    store
        .run_transaction(&ctx, |tx| {
            tx.set_merge(&container, fields.clone())
                .map_err(Error::from)
        })
        .unwrap();

    let err = serial.number(&ctx).unwrap_err();
    assert!(matches!(
        err,
        Error::Store {
            source: StoreError::TypeMismatch { .. },
            ..
        }
    ));
}

#[test]
fn write_from_another_transaction_is_rejected() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut coder = Coder::new(&store, "codes", "a", 4);

    let mut first = store.begin().unwrap();
    let mut second = store.begin().unwrap();
    coder.number_rx(&ctx, &mut first).unwrap();
    let err = coder.number_wx(&ctx, &mut second).unwrap_err();
    assert_eq!(err.violation(), Some(ProtocolViolation::TransactionMismatch));

    coder.number_wx(&ctx, &mut first).unwrap();
    store.commit(&mut first).unwrap();
}

#[test]
fn dead_context_fails_before_any_io() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    ctx.cancel();
    let mut coder = Coder::new(&store, "codes", "a", 4);
    let mut counter = Counter::new(&store, "counters", "a", 10);

    let mut tx = store.begin().unwrap();
    assert!(matches!(coder.number_rx(&ctx, &mut tx), Err(Error::Cancelled)));
    assert!(matches!(counter.count_all(&ctx), Err(Error::Cancelled)));
    assert!(matches!(counter.increment(&ctx, 1), Err(Error::Cancelled)));
    assert!(tx.is_active());
    assert!(store.is_empty());
}

#[test]
fn empty_address_is_rejected() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "");
    assert!(matches!(
        serial.number(&ctx),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn coder_value_names_its_shard() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let picks = ScriptedRandom::new([3, 3, 7]);
    let mut coder = Coder::with_rng(&store, "codes", "orders", 10, picks);

    let first = coder.number(&ctx).unwrap();
    assert_eq!((first % 10, first / 10), (3, 1));
    let second = coder.number(&ctx).unwrap();
    assert_eq!((second % 10, second / 10), (3, 2));
    let third = coder.number(&ctx).unwrap();
    assert_eq!((third % 10, third / 10), (7, 1));

    assert_eq!(coder.shards_count(&ctx).unwrap(), 2);
    let info = coder.shards_info(&ctx).unwrap();
    assert_eq!(info[0].key, "3");
    assert_eq!(info[0].fields.get("C").and_then(|v| v.as_int()), Some(2));
    let container = store.get(&coder.shard_set().container()).unwrap().unwrap();
    assert_eq!(container.int("shards"), Some(10));
}

#[test]
fn coder_floors_shards_at_one() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut coder = Coder::new(&store, "codes", "tiny", 0);

    assert_eq!(coder.shard_set().num_shards(), 1);
    let values: Vec<_> = (0..3).map(|_| coder.number(&ctx).unwrap()).collect();
    assert_eq!(values, [1, 2, 3]);
}

#[test]
fn coder_tokens_decode_to_issued_values() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut coder = Coder::with_rng(&store, "codes", "orders", 10, ScriptedRandom::new([4]));

    assert_eq!(decode_code(&coder.code(&ctx).unwrap()).unwrap(), 14);
    assert_eq!(decode_code16(&coder.code16(&ctx).unwrap()).unwrap(), 24);
    assert_eq!(decode_code64(&coder.code64(&ctx).unwrap()).unwrap(), 34);
}

#[test]
fn coder_values_are_unique_under_contention() {
    let store = patient_store();
    let ctx = Context::background();

    let values: Vec<u64> = scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut coder = Coder::new(&store, "codes", "orders", 8);
                    (0..50).map(|_| coder.number(&ctx).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = values.iter().copied().collect();
    assert_eq!(unique.len(), 200);

    // Per shard, the local counters issued are exactly 1..=k.
    let mut per_shard = [0_u64; 8];
    for v in &values {
        per_shard[(v % 8) as usize] += 1;
    }
    for (shard, &k) in per_shard.iter().enumerate() {
        let locals: HashSet<_> = values
            .iter()
            .filter(|&&v| v % 8 == shard as u64)
            .map(|v| v / 8)
            .collect();
        assert_eq!(locals, (1..=k).collect());
    }
}

#[test]
fn counter_floors_shards() {
    let store = MemoryStore::default();
    let counter = Counter::new(&store, "counters", "a", 1);
    assert_eq!(counter.shard_set().num_shards(), MIN_COUNTER_SHARDS);
}

#[test]
fn counter_maintains_every_level_by_default() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut counter = Counter::with_sources(
        &store,
        "counters",
        "views",
        10,
        ScriptedRandom::new([2]),
        FixedClock(at(2026, 10, 16, 14)),
    );

    counter.increment(&ctx, 5).unwrap();
    counter.increment(&ctx, 2).unwrap();

    let keys: Vec<_> = counter
        .shards_info(&ctx)
        .unwrap()
        .into_iter()
        .map(|s| s.key)
        .collect();
    assert_eq!(
        keys,
        ["D20261016_2", "H2026101614_2", "M202610_2", "T_2", "Y2026_2"]
    );
    assert_eq!(counter.count_all(&ctx).unwrap(), 7);
}

#[test]
fn counter_sums_periods_and_breakdowns() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let increment_at = |t: DateTime<Utc>, delta: i64| {
        let picks = ScriptedRandom::new([0, 1, 2, 3, 4]);
        Counter::with_sources(&store, "counters", "views", 10, picks, FixedClock(t))
            .increment(&ctx, delta)
            .unwrap();
    };
    increment_at(at(2026, 10, 16, 9), 1);
    increment_at(at(2026, 10, 16, 9), 2);
    increment_at(at(2026, 10, 16, 14), 4);
    increment_at(at(2026, 10, 17, 1), 8);
    increment_at(at(2026, 11, 2, 0), -3);

    let counter = Counter::new(&store, "counters", "views", 10);
    assert_eq!(counter.count_all(&ctx).unwrap(), 12);

    let day = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
    let oct16 = counter
        .count_period(&ctx, Level::Day, day(2026, 10, 16), day(2026, 10, 17))
        .unwrap();
    assert_eq!(oct16, 7);
    let october = counter
        .count_period(&ctx, Level::Month, day(2026, 10, 1), day(2026, 11, 1))
        .unwrap();
    assert_eq!(october, 15);
    let year = counter
        .count_period(&ctx, Level::Year, day(2026, 1, 1), day(2027, 1, 1))
        .unwrap();
    assert_eq!(year, 12);

    let hours = counter
        .count_breakdown(&ctx, Level::Hour, day(2026, 10, 16), day(2026, 10, 17))
        .unwrap();
    let hours: Vec<_> = hours
        .into_iter()
        .map(|(t, n)| (t.format("%H").to_string(), n))
        .collect();
    assert_eq!(hours, [("09".to_owned(), 3), ("14".to_owned(), 4)]);
}

#[test]
fn counter_rejects_impossible_ranges() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let counter = Counter::new(&store, "counters", "views", 10);
    let t = at(2026, 10, 16, 0);

    assert!(matches!(
        counter.count_period(&ctx, Level::Total, t, t),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        counter.count_period(&ctx, Level::Day, t, at(2026, 10, 15, 0)),
        Err(Error::InvalidArgument { .. })
    ));
    assert_eq!(counter.count_period(&ctx, Level::Day, t, t).unwrap(), 0);
}

#[test]
fn counter_level_set_is_configurable() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut counter =
        Counter::new(&store, "counters", "views", 10).with_levels([Level::Day, Level::Day]);
    assert_eq!(counter.levels(), [Level::Total, Level::Day]);

    counter.increment(&ctx, 1).unwrap();
    assert_eq!(counter.shards_count(&ctx).unwrap(), 2);
}

#[test]
fn counter_delete_clears_every_level() {
    let store = MemoryStore::new(MemoryStoreConfig {
        max_batch_size: 7,
        ..MemoryStoreConfig::default()
    });
    let ctx = Context::background();
    let mut counter = Counter::new(&store, "counters", "views", 10);
    for _ in 0..20 {
        counter.increment(&ctx, 1).unwrap();
    }
    let shards = counter.shards_count(&ctx).unwrap();
    assert!(shards >= 5);

    assert_eq!(counter.delete(&ctx).unwrap(), shards);
    assert_eq!(counter.count_all(&ctx).unwrap(), 0);
    assert_eq!(counter.delete(&ctx).unwrap(), 0);
    assert!(store.is_empty());
}

#[test]
fn counter_survives_concurrent_callers() {
    let store = patient_store();
    let ctx = Context::background();

    scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                let mut counter = Counter::new(&store, "counters", "clicks", 1);
                for _ in 0..5 {
                    counter.increment(&ctx, 1).unwrap();
                }
            });
        }
    });

    let counter = Counter::new(&store, "counters", "clicks", 1);
    assert_eq!(counter.count_all(&ctx).unwrap(), 15);
}

#[test]
fn generators_share_one_transaction() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut serial = Serial::new(&store, "serials", "orders");
    let mut coder = Coder::with_rng(&store, "codes", "orders", 10, ScriptedRandom::new([5]));
    let mut counter = Counter::new(&store, "counters", "orders", 10).with_levels([]);

    let (number, code) = store
        .run_transaction(&ctx, |tx| {
            let number = serial.number_rx(&ctx, tx)?;
            let code = coder.number_rx(&ctx, tx)?;
            counter.increment_rx(&ctx, tx)?;
            serial.number_wx(&ctx, tx)?;
            coder.number_wx(&ctx, tx)?;
            counter.increment_wx(&ctx, tx, 1)?;
            Ok((number, code))
        })
        .unwrap();

    assert_eq!((number, code), (1, 15));
    assert_eq!(CounterGenerator::count_all(&counter, &ctx).unwrap(), 1);
    assert_eq!(CoderGenerator::shards_count(&coder, &ctx).unwrap(), 1);
}

#[test]
fn delete_inside_caller_transaction() {
    let store = MemoryStore::default();
    let ctx = Context::background();
    let mut coder = Coder::new(&store, "codes", "orders", 4);
    for _ in 0..10 {
        coder.number(&ctx).unwrap();
    }
    let shards = coder.shards_count(&ctx).unwrap();

    let (scheduled, complete) = store
        .run_transaction(&ctx, |tx| coder.delete_tx(&ctx, tx))
        .unwrap();
    assert_eq!((scheduled, complete), (shards, true));
    assert!(store.is_empty());
}
