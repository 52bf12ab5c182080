use camino::Utf8PathBuf;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tabula_datastore::*;

struct Setup {
    store: SchemaStore,
    db: Database,
    table: Table,
    columns: Vec<Column>,
}

fn build_store(root: Utf8PathBuf) -> Setup {
    let mut store = SchemaStore::open(StoreConfig::new(root)).unwrap();
    let db = store.add_database(Database::new("bench")).unwrap();
    let table = store.add_table(Table::new(db.id, "t")).unwrap();
    let columns = vec![
        Column::new(table.id, "name", ValueType::String).primary(),
        Column::new(table.id, "count", ValueType::Int),
        Column::new(table.id, "ratio", ValueType::Double),
        Column::new(table.id, "parent", ValueType::Table).referencing(table.id),
    ]
    .into_iter()
    .map(|c| store.add_column(c).unwrap())
    .collect();

    Setup {
        store,
        db,
        table,
        columns,
    }
}

fn build_test_rows(setup: &Setup, row_count: usize) -> Vec<Row> {
    (0..row_count)
        .map(|i| {
            let mut row = Row::new(setup.table.id, &setup.columns);
            row.set_value(
                setup.columns[0].id,
                StoredValue::String(Some(format!("string{}", i))),
            );
            row.set_value(setup.columns[1].id, StoredValue::Int(Some(i as i64)));
            row.set_value(setup.columns[2].id, StoredValue::Double(Some(i as f64 / 2.0)));
            row
        })
        .collect()
}

fn tempdir_root(tdir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(tdir.path().to_path_buf()).expect("Temp dirs should be utf8")
}

pub fn inserting(c: &mut Criterion) {
    tabula_logging::log_to_stderr();

    let mut group = c.benchmark_group("inserting");
    for size in [5, 10, 20, 50, 100, 500] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, size| {
            let tdir = tempfile::TempDir::new().expect("Should create");
            let mut setup = build_store(tempdir_root(&tdir));
            let rows = build_test_rows(&setup, *size as usize);
            let db = setup.db.id;

            b.iter(|| {
                let ds = setup.store.data_store(db).unwrap();
                for r in rows.iter() {
                    ds.add_row(r).unwrap();
                }
                for r in rows.iter() {
                    ds.remove_row(r).unwrap();
                }
            });
        });
    }
    group.finish();
}

pub fn loading(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading");
    for size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, size| {
            let tdir = tempfile::TempDir::new().expect("Should create");
            let mut setup = build_store(tempdir_root(&tdir));
            let rows = build_test_rows(&setup, *size as usize);
            let db = setup.db.id;
            let table = setup.table.clone();
            {
                let ds = setup.store.data_store(db).unwrap();
                for r in rows.iter() {
                    ds.add_row(r).unwrap();
                }
            }

            b.iter(|| {
                let ds = setup.store.data_store(db).unwrap();
                let loaded = ds.rows_for(&table);
                assert_eq!(loaded.len(), rows.len());
                for r in loaded.iter() {
                    criterion::black_box(ds.non_recursive_description(r));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, inserting, loading);
criterion_main!(benches);
