use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use martforge_core::{Error, Result};

use crate::adapter::ExportedKey;

fn db_error(err: sqlx::Error) -> Error {
    Error::Db(err.to_string())
}

pub async fn list_tables(
    conn: &mut PgConnection,
    schema: &str,
    relkinds: &[String],
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select c.relname
        from pg_class c
        join pg_namespace n on n.oid = c.relnamespace
        where n.nspname = $1
          and c.relkind::text = any($2)
        order by c.relname
        "#,
    )
    .bind(schema)
    .bind(relkinds)
    .fetch_all(conn)
    .await
    .map_err(db_error)?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn list_columns(conn: &mut PgConnection, schema: &str, table: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select a.attname
        from pg_attribute a
        join pg_class c on c.oid = a.attrelid
        join pg_namespace n on n.oid = c.relnamespace
        where n.nspname = $1
          and c.relname = $2
          and a.attnum > 0
          and not a.attisdropped
        order by a.attnum
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(conn)
    .await
    .map_err(db_error)?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn list_primary_key(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select att.attname
        from pg_constraint con
        join pg_class rel on rel.oid = con.conrelid
        join pg_namespace nsp on nsp.oid = rel.relnamespace
        join unnest(con.conkey) with ordinality as ord(attnum, ordinality) on true
        join pg_attribute att on att.attrelid = rel.oid and att.attnum = ord.attnum
        where nsp.nspname = $1
          and rel.relname = $2
          and con.contype = 'p'
        order by ord.ordinality
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(conn)
    .await
    .map_err(db_error)?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn list_exported_keys(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<ExportedKey>> {
    let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
        r#"
        select
          fk_nsp.nspname,
          fk_rel.relname,
          fk_att.attname,
          pk_att.attname,
          ord.ordinality
        from pg_constraint con
        join pg_class pk_rel on pk_rel.oid = con.confrelid
        join pg_namespace pk_nsp on pk_nsp.oid = pk_rel.relnamespace
        join pg_class fk_rel on fk_rel.oid = con.conrelid
        join pg_namespace fk_nsp on fk_nsp.oid = fk_rel.relnamespace
        join unnest(con.conkey, con.confkey) with ordinality as ord(fk_attnum, pk_attnum, ordinality) on true
        join pg_attribute fk_att on fk_att.attrelid = fk_rel.oid and fk_att.attnum = ord.fk_attnum
        join pg_attribute pk_att on pk_att.attrelid = pk_rel.oid and pk_att.attnum = ord.pk_attnum
        where pk_nsp.nspname = $1
          and pk_rel.relname = $2
          and con.contype = 'f'
        order by fk_nsp.nspname, fk_rel.relname, con.conname, ord.ordinality
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(conn)
    .await
    .map_err(db_error)?;

    Ok(rows
        .into_iter()
        .map(|(fk_schema, fk_table, fk_column, pk_column, key_seq)| ExportedKey {
            fk_schema,
            fk_table,
            fk_column,
            pk_column,
            key_seq: u16::try_from(key_seq).unwrap_or(u16::MAX),
        })
        .collect())
}

/// Quote an identifier for interpolation into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("{}::text", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn text_rows(rows: Vec<PgRow>, width: usize) -> Result<Vec<Vec<Option<String>>>> {
    rows.into_iter()
        .map(|row| {
            (0..width)
                .map(|index| row.try_get::<Option<String>, _>(index).map_err(db_error))
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

pub async fn first_rows(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    columns: &[String],
    limit: usize,
) -> Result<Vec<Vec<Option<String>>>> {
    let sql = format!(
        "select {} from {}.{} limit $1",
        select_list(columns),
        quote_ident(schema),
        quote_ident(table)
    );
    let rows = sqlx::query(&sql)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    text_rows(rows, columns.len())
}

pub async fn distinct_values(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    columns: &[String],
    limit: usize,
) -> Result<Vec<Vec<Option<String>>>> {
    let projection = select_list(columns);
    let sql = format!(
        "select distinct {projection} from {}.{} order by {projection} limit $1",
        quote_ident(schema),
        quote_ident(table)
    );
    let rows = sqlx::query(&sql)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
    text_rows(rows, columns.len())
}
