use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use super::{Dimension, FactLoad, TimeRow, UnresolvedFact, Warehouse, WarehouseCounts};
use crate::db::DbPool;
use crate::error::StorageError;
use crate::record::TransactionRecord;

const STAGING_COLUMNS: usize = 9;
const MAX_BIND_PARAMETERS: usize = 65_535;

const DROP_STAGING: &str = "DROP TABLE IF EXISTS staging_lancamentos";

const CREATE_STAGING: &str = r#"
    CREATE TABLE staging_lancamentos (
        linha BIGINT NOT NULL,
        descricao TEXT NOT NULL,
        tipo TEXT NOT NULL,
        grupo TEXT NOT NULL,
        categoria TEXT NOT NULL,
        classificacao TEXT NOT NULL,
        periodo TEXT NOT NULL,
        valor NUMERIC(15, 2) NOT NULL,
        id_hash TEXT NOT NULL
    )
"#;

const UPSERT_TYPES: &str = r#"
    INSERT INTO dim_tipo (nome_tipo)
    SELECT DISTINCT sl.tipo
    FROM staging_lancamentos sl
    WHERE NOT EXISTS (
        SELECT 1 FROM dim_tipo dt WHERE dt.nome_tipo = sl.tipo
    )
    ON CONFLICT (nome_tipo) DO NOTHING
"#;

const UPSERT_GROUPS: &str = r#"
    INSERT INTO dim_grupo (id_tipo, nome_grupo)
    SELECT DISTINCT dt.id_tipo, sl.grupo
    FROM staging_lancamentos sl
    JOIN dim_tipo dt ON dt.nome_tipo = sl.tipo
    WHERE NOT EXISTS (
        SELECT 1 FROM dim_grupo dg
        WHERE dg.id_tipo = dt.id_tipo AND dg.nome_grupo = sl.grupo
    )
    ON CONFLICT (id_tipo, nome_grupo) DO NOTHING
"#;

const UPSERT_CATEGORIES: &str = r#"
    INSERT INTO dim_categoria (id_grupo, nome_categoria)
    SELECT DISTINCT dg.id_grupo, sl.categoria
    FROM staging_lancamentos sl
    JOIN dim_tipo dt ON dt.nome_tipo = sl.tipo
    JOIN dim_grupo dg ON dg.id_tipo = dt.id_tipo AND dg.nome_grupo = sl.grupo
    WHERE NOT EXISTS (
        SELECT 1 FROM dim_categoria dc
        WHERE dc.id_grupo = dg.id_grupo AND dc.nome_categoria = sl.categoria
    )
    ON CONFLICT (id_grupo, nome_categoria) DO NOTHING
"#;

const UPSERT_CLASSIFICATIONS: &str = r#"
    INSERT INTO dim_classificacao (nome_classificacao)
    SELECT DISTINCT sl.classificacao
    FROM staging_lancamentos sl
    WHERE NOT EXISTS (
        SELECT 1 FROM dim_classificacao cs WHERE cs.nome_classificacao = sl.classificacao
    )
    ON CONFLICT (nome_classificacao) DO NOTHING
"#;

// Staged rows with (ano, mes) extracted from the period text. Malformed
// periods yield NULLs and therefore never join the time dimension.
const STAGED_WITH_PERIOD: &str = r#"
    WITH staged AS (
        SELECT
            sl.*,
            CASE WHEN btrim(sl.periodo) ~ '^[0-9]{1,2}/[0-9]{4}$'
                 THEN split_part(btrim(sl.periodo), '/', 2)::int END AS ano,
            CASE WHEN btrim(sl.periodo) ~ '^[0-9]{1,2}/[0-9]{4}$'
                 THEN split_part(btrim(sl.periodo), '/', 1)::int END AS mes
        FROM staging_lancamentos sl
    )
"#;

const SELECT_UNRESOLVED: &str = r#"
    SELECT
        s.linha,
        s.id_hash,
        s.tipo,
        s.grupo,
        s.categoria,
        s.classificacao,
        s.periodo,
        dt.id_tipo,
        dg.id_grupo,
        dc.id_categoria,
        cs.id_classificacao,
        dtmp.id_tempo
    FROM staged s
    LEFT JOIN dim_tipo dt ON dt.nome_tipo = s.tipo
    LEFT JOIN dim_grupo dg ON dg.id_tipo = dt.id_tipo AND dg.nome_grupo = s.grupo
    LEFT JOIN dim_categoria dc ON dc.id_grupo = dg.id_grupo AND dc.nome_categoria = s.categoria
    LEFT JOIN dim_classificacao cs ON cs.nome_classificacao = s.classificacao
    LEFT JOIN dim_tempo dtmp ON dtmp.ano = s.ano AND dtmp.mes = s.mes
    WHERE dt.id_tipo IS NULL
       OR dg.id_grupo IS NULL
       OR dc.id_categoria IS NULL
       OR cs.id_classificacao IS NULL
       OR dtmp.id_tempo IS NULL
    ORDER BY s.linha
"#;

const INSERT_FACTS: &str = r#"
    INSERT INTO fato_lancamento (
        id_tipo,
        id_grupo,
        id_categoria,
        id_tempo,
        id_classificacao,
        descricao,
        valor,
        id_hash
    )
    SELECT
        dt.id_tipo,
        dg.id_grupo,
        dc.id_categoria,
        dtmp.id_tempo,
        cs.id_classificacao,
        s.descricao,
        s.valor,
        s.id_hash
    FROM staged s
    JOIN dim_tipo dt ON dt.nome_tipo = s.tipo
    JOIN dim_grupo dg ON dg.id_tipo = dt.id_tipo AND dg.nome_grupo = s.grupo
    JOIN dim_categoria dc ON dc.id_grupo = dg.id_grupo AND dc.nome_categoria = s.categoria
    JOIN dim_classificacao cs ON cs.nome_classificacao = s.classificacao
    JOIN dim_tempo dtmp ON dtmp.ano = s.ano AND dtmp.mes = s.mes
    ORDER BY s.linha
    ON CONFLICT (id_hash) DO NOTHING
"#;

/// Star schema in Postgres. Every method runs in its own transaction.
#[derive(Clone)]
pub struct PostgresWarehouse {
    pool: DbPool,
}

impl PostgresWarehouse {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn upsert(&self, operation: &'static str, sql: &'static str) -> Result<u64, StorageError> {
        let storage = |err: sqlx::Error| StorageError::new(operation, err);
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = sqlx::query::<Postgres>(sql)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        debug!(operation, rows = result.rows_affected(), "upsert committed");
        Ok(result.rows_affected())
    }

    async fn count(&self, table: &str) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|err| StorageError::new("count rows", err))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn replace_staging(
        &self,
        records: &[TransactionRecord],
        chunk_size: usize,
    ) -> Result<u64, StorageError> {
        let storage = |err: sqlx::Error| StorageError::new("replace staging", err);
        let chunk_size = chunk_size.clamp(1, MAX_BIND_PARAMETERS / STAGING_COLUMNS);

        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query::<Postgres>(DROP_STAGING)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query::<Postgres>(CREATE_STAGING)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let mut inserted = 0;
        for chunk in records.chunks(chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO staging_lancamentos \
                 (linha, descricao, tipo, grupo, categoria, classificacao, periodo, valor, id_hash) ",
            );
            builder.push_values(chunk, |mut row, record| {
                let fields = &record.fields;
                row.push_bind(record.row as i64)
                    .push_bind(fields.description.as_str())
                    .push_bind(fields.transaction_type.as_str())
                    .push_bind(fields.group.as_str())
                    .push_bind(fields.category.as_str())
                    .push_bind(fields.classification.as_str())
                    .push_bind(fields.period.as_str())
                    .push_bind(fields.amount)
                    .push_bind(record.content_hash());
            });
            let result = builder.build().execute(&mut *tx).await.map_err(storage)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(storage)?;
        Ok(inserted)
    }

    async fn staged_periods(&self) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<Postgres, String>(
            "SELECT DISTINCT periodo FROM staging_lancamentos ORDER BY periodo",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StorageError::new("read staged periods", err))
    }

    async fn upsert_types(&self) -> Result<u64, StorageError> {
        self.upsert("upsert dim_tipo", UPSERT_TYPES).await
    }

    async fn upsert_groups(&self) -> Result<u64, StorageError> {
        self.upsert("upsert dim_grupo", UPSERT_GROUPS).await
    }

    async fn upsert_categories(&self) -> Result<u64, StorageError> {
        self.upsert("upsert dim_categoria", UPSERT_CATEGORIES).await
    }

    async fn upsert_classifications(&self) -> Result<u64, StorageError> {
        self.upsert("upsert dim_classificacao", UPSERT_CLASSIFICATIONS)
            .await
    }

    async fn upsert_time(&self, rows: &[TimeRow]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let storage = |err: sqlx::Error| StorageError::new("upsert dim_tempo", err);

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO dim_tempo (ano, mes, semana, data_inicio, data_fim) ");
        builder.push_values(rows, |mut row, time| {
            row.push_bind(time.year)
                .push_bind(time.month as i32)
                .push_bind(time.week as i32)
                .push_bind(time.period_start)
                .push_bind(time.period_end);
        });
        builder.push(" ON CONFLICT (ano, mes) DO NOTHING");

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = builder.build().execute(&mut *tx).await.map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn load_facts(&self) -> Result<FactLoad, StorageError> {
        let storage = |err: sqlx::Error| StorageError::new("load fato_lancamento", err);
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let staged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staging_lancamentos")
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let staged = staged.max(0) as u64;

        let rows = sqlx::query::<Postgres>(&format!("{STAGED_WITH_PERIOD} {SELECT_UNRESOLVED}"))
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;

        let mut unresolved = Vec::new();
        for row in rows {
            let linha: i64 = row.try_get("linha").map_err(storage)?;
            let content_hash: String = row.try_get("id_hash").map_err(storage)?;
            let tipo: String = row.try_get("tipo").map_err(storage)?;
            let grupo: String = row.try_get("grupo").map_err(storage)?;
            let categoria: String = row.try_get("categoria").map_err(storage)?;
            let classificacao: String = row.try_get("classificacao").map_err(storage)?;
            let periodo: String = row.try_get("periodo").map_err(storage)?;

            let checks = [
                (Dimension::Type, "id_tipo", tipo.clone()),
                (Dimension::Group, "id_grupo", format!("{tipo}/{grupo}")),
                (
                    Dimension::Category,
                    "id_categoria",
                    format!("{tipo}/{grupo}/{categoria}"),
                ),
                (Dimension::Classification, "id_classificacao", classificacao),
                (Dimension::Time, "id_tempo", periodo),
            ];
            for (dimension, column, natural_key) in checks {
                let id: Option<i64> = row.try_get(column).map_err(storage)?;
                if id.is_none() {
                    unresolved.push(UnresolvedFact {
                        row: linha.max(0) as usize,
                        content_hash: content_hash.clone(),
                        dimension,
                        natural_key,
                    });
                }
            }
        }

        if !unresolved.is_empty() {
            tx.rollback().await.map_err(storage)?;
            return Ok(FactLoad {
                staged,
                inserted: 0,
                skipped: 0,
                unresolved,
            });
        }

        let result = sqlx::query::<Postgres>(&format!("{STAGED_WITH_PERIOD} {INSERT_FACTS}"))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        let inserted = result.rows_affected();
        Ok(FactLoad {
            staged,
            inserted,
            skipped: staged.saturating_sub(inserted),
            unresolved,
        })
    }

    async fn counts(&self) -> Result<WarehouseCounts, StorageError> {
        let staging_exists: bool = sqlx::query_scalar(
            "SELECT to_regclass('staging_lancamentos') IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StorageError::new("inspect staging", err))?;

        let staging = if staging_exists {
            self.count("staging_lancamentos").await?
        } else {
            0
        };

        Ok(WarehouseCounts {
            staging,
            types: self.count(Dimension::Type.table()).await?,
            groups: self.count(Dimension::Group.table()).await?,
            categories: self.count(Dimension::Category.table()).await?,
            classifications: self.count(Dimension::Classification.table()).await?,
            periods: self.count(Dimension::Time.table()).await?,
            facts: self.count("fato_lancamento").await?,
        })
    }
}
