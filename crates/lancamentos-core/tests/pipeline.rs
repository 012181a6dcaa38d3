use std::fs;
use std::path::PathBuf;

use lancamentos_core::config::EtlConfig;
use lancamentos_core::error::EtlError;
use lancamentos_core::facts;
use lancamentos_core::ingestion::read_batch;
use lancamentos_core::pipeline::{Pipeline, RunState};
use lancamentos_core::staging;
use lancamentos_core::warehouse::{Dimension, MemoryWarehouse, Warehouse, WarehouseCounts};
use rust_decimal::Decimal;

const HEADER: [&str; 7] = [
    "Descrição",
    "Tipo",
    "Grupo",
    "Categoria",
    "Classificação",
    "Data",
    "Valor",
];

fn csv_bytes(rows: &[[&str; 7]]) -> Vec<u8> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.into_inner().unwrap()
}

fn fixture() -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("lancamentos_2024_03.csv");
    fs::read(path).unwrap()
}

const SALARY: [&str; 7] = [
    "Pagamento",
    "Receita",
    "Salário",
    "Fixo",
    "Essencial",
    "03/2024",
    "5.000,00",
];

#[tokio::test]
async fn single_row_loads_every_dimension_and_one_fact() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();

    let report = Pipeline::new(&warehouse, &config)
        .run_file("salary.csv", &csv_bytes(&[SALARY]))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.rows_received, 1);
    assert_eq!(report.rows_staged, Some(1));
    assert_eq!(report.dimensions.unwrap().total(), 5);
    assert_eq!(report.facts.unwrap().inserted, 1);

    assert_eq!(warehouse.type_names(), vec!["Receita".to_string()]);

    let time = warehouse.time_rows();
    assert_eq!(time.len(), 1);
    assert_eq!((time[0].year, time[0].month, time[0].week), (2024, 3, 9));

    let facts = warehouse.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].description, "Pagamento");
    assert_eq!(facts[0].amount, Decimal::new(500000, 2));
    assert_eq!(
        facts[0].content_hash,
        format!(
            "{:x}",
            md5::compute("receita-salário-fixo-03/2024-pagamento-5000.00".as_bytes())
        )
    );
}

#[tokio::test]
async fn reloading_the_same_file_inserts_nothing() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let pipeline = Pipeline::new(&warehouse, &config);
    let contents = csv_bytes(&[SALARY]);

    pipeline.run_file("salary.csv", &contents).await.unwrap();
    let second = pipeline.run_file("salary.csv", &contents).await.unwrap();

    assert_eq!(second.state, RunState::Done);
    assert_eq!(second.dimensions.unwrap().total(), 0);
    let facts = second.facts.unwrap();
    assert_eq!(facts.inserted, 0);
    assert_eq!(facts.skipped, 1);
    assert_eq!(warehouse.facts().len(), 1);
}

#[tokio::test]
async fn monthly_export_is_idempotent() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let pipeline = Pipeline::new(&warehouse, &config);

    pipeline.run_file("export.csv", &fixture()).await.unwrap();
    let after_first = warehouse.counts().await.unwrap();
    pipeline.run_file("export.csv", &fixture()).await.unwrap();
    let after_second = warehouse.counts().await.unwrap();

    assert_eq!(
        after_first,
        WarehouseCounts {
            staging: 5,
            types: 2,
            groups: 5,
            categories: 5,
            classifications: 3,
            periods: 2,
            facts: 5,
        }
    );
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn successful_run_walks_every_state() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();

    let report = Pipeline::new(&warehouse, &config)
        .run_file("export.csv", &fixture())
        .await
        .unwrap();

    assert_eq!(
        report.history,
        vec![
            RunState::Received,
            RunState::Validated,
            RunState::Staged,
            RunState::DimensionsResolved,
            RunState::FactsLoaded,
            RunState::Done,
        ]
    );
}

#[tokio::test]
async fn rejected_batch_writes_nothing() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let contents = csv_bytes(&[
        SALARY,
        ["Aluguel", "", "Moradia", "Fixo", "Essencial", "03/2024", "1.850,00"],
        SALARY,
        ["Cinema", "Despesa", "Lazer", "Variável", "Supérfluo", "", ""],
    ]);

    let err = Pipeline::new(&warehouse, &config)
        .run_file("broken.csv", &contents)
        .await
        .unwrap_err();

    assert_eq!(err.failed_at, RunState::Validated);
    assert_eq!(err.report.state, RunState::Failed);
    let EtlError::Validation(report) = &err.source else {
        panic!("expected a validation error, got {:?}", err.source);
    };
    assert_eq!(report.offending_rows(), vec![2, 4]);
    assert_eq!(warehouse.counts().await.unwrap(), WarehouseCounts::default());
}

#[tokio::test]
async fn amount_with_extra_precision_rejects_the_batch() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let mut precise = SALARY;
    precise[6] = "1,234";
    let mut rounded = SALARY;
    rounded[6] = "1,23";

    let err = Pipeline::new(&warehouse, &config)
        .run_file("precision.csv", &csv_bytes(&[rounded, precise]))
        .await
        .unwrap_err();

    assert_eq!(err.failed_at, RunState::Validated);
    assert!(
        matches!(err.source, EtlError::InvalidAmount { row: 2, .. }),
        "{:?}",
        err.source
    );
    assert_eq!(warehouse.counts().await.unwrap(), WarehouseCounts::default());
}

#[tokio::test]
async fn oversized_amount_fails_before_staging() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let mut huge = SALARY;
    huge[6] = "10.000.000.000.000,00";

    let err = Pipeline::new(&warehouse, &config)
        .run_file("huge.csv", &csv_bytes(&[huge]))
        .await
        .unwrap_err();

    assert_eq!(err.failed_at, RunState::Validated);
    assert_eq!(err.report.rows_staged, None);
    assert!(matches!(err.source, EtlError::InvalidAmount { row: 1, .. }));
    assert_eq!(warehouse.counts().await.unwrap(), WarehouseCounts::default());
}

#[tokio::test]
async fn malformed_period_stops_before_any_dimension_write() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let mut row = SALARY;
    row[5] = "13/2024";

    let err = Pipeline::new(&warehouse, &config)
        .run_file("bad_period.csv", &csv_bytes(&[row]))
        .await
        .unwrap_err();

    assert_eq!(err.failed_at, RunState::DimensionsResolved);
    assert!(matches!(err.source, EtlError::InvalidPeriod(_)), "{:?}", err.source);
    assert_eq!(err.report.rows_staged, Some(1));
    assert_eq!(
        warehouse.counts().await.unwrap(),
        WarehouseCounts {
            staging: 1,
            ..WarehouseCounts::default()
        }
    );
}

#[tokio::test]
async fn rows_differing_only_in_case_collapse_to_one_fact() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let mut shouted = SALARY;
    shouted[0] = "PAGAMENTO";

    let report = Pipeline::new(&warehouse, &config)
        .run_file("dupes.csv", &csv_bytes(&[SALARY, shouted]))
        .await
        .unwrap();

    let facts = report.facts.unwrap();
    assert_eq!(facts.staged, 2);
    assert_eq!(facts.inserted, 1);
    assert_eq!(facts.skipped, 1);
    assert_eq!(warehouse.facts()[0].description, "Pagamento");
}

#[tokio::test]
async fn same_text_under_another_type_is_a_distinct_group() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let mut refund = SALARY;
    refund[0] = "Estorno";
    refund[1] = "Despesa";

    Pipeline::new(&warehouse, &config)
        .run_file("groups.csv", &csv_bytes(&[SALARY, refund]))
        .await
        .unwrap();

    let counts = warehouse.counts().await.unwrap();
    assert_eq!(counts.types, 2);
    assert_eq!(counts.groups, 2);
    assert_eq!(counts.categories, 2);
    assert_eq!(counts.classifications, 1);
}

#[tokio::test]
async fn facts_without_dimensions_are_refused() {
    let warehouse = MemoryWarehouse::new();
    let batch = read_batch("salary.csv", &csv_bytes(&[SALARY])).unwrap();
    staging::replace_staging(&warehouse, &batch, 100).await.unwrap();

    let err = facts::load_facts(&warehouse).await.unwrap_err();

    let EtlError::ReferentialIntegrity { unresolved } = err else {
        panic!("expected a referential integrity error, got {err:?}");
    };
    let dimensions: Vec<Dimension> = unresolved.iter().map(|fact| fact.dimension).collect();
    assert_eq!(
        dimensions,
        vec![
            Dimension::Type,
            Dimension::Group,
            Dimension::Category,
            Dimension::Classification,
            Dimension::Time,
        ]
    );
    assert!(unresolved.iter().all(|fact| fact.row == 1));
    assert!(warehouse.facts().is_empty());
}

#[tokio::test]
async fn rerun_from_staging_completes_an_interrupted_run() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let batch = read_batch("export.csv", &fixture()).unwrap();
    staging::replace_staging(&warehouse, &batch, config.staging_chunk_size)
        .await
        .unwrap();

    let report = Pipeline::new(&warehouse, &config)
        .rerun_from_staging()
        .await
        .unwrap();

    assert_eq!(report.source, "staging");
    assert_eq!(
        report.history,
        vec![
            RunState::Staged,
            RunState::DimensionsResolved,
            RunState::FactsLoaded,
            RunState::Done,
        ]
    );
    assert_eq!(report.facts.unwrap().inserted, 5);
}

#[tokio::test]
async fn run_batch_starts_from_validated() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let batch = read_batch("export.csv", &fixture()).unwrap();

    let report = Pipeline::new(&warehouse, &config)
        .run_batch(&batch)
        .await
        .unwrap();

    assert_eq!(report.history.first(), Some(&RunState::Validated));
    assert_eq!(report.state, RunState::Done);
    assert_eq!(warehouse.facts().len(), 5);
}

#[tokio::test]
async fn each_run_gets_its_own_batch_id() {
    let warehouse = MemoryWarehouse::new();
    let config = EtlConfig::default();
    let pipeline = Pipeline::new(&warehouse, &config);

    let first = pipeline.run_file("a.csv", &fixture()).await.unwrap();
    let second = pipeline.run_file("a.csv", &fixture()).await.unwrap();

    assert_ne!(first.batch_id, second.batch_id);
}
