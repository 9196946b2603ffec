use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::import::ImportedReport;
use crate::models::{AttendanceRecord, HierarchyEntity, HierarchyLevel, ReportScope};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts a small Benin hierarchy with eight weeks of reports ending at `today`.
pub async fn seed(pool: &PgPool, today: NaiveDate) -> anyhow::Result<usize> {
    // (region, group, district, cell, previous weekly attendance, recent weekly attendance)
    let cells = [
        ("Littoral", "Cotonou Centre", "Akpakpa", "Cellule Espoir", 38, 46),
        ("Littoral", "Cotonou Centre", "Gbegamey", "Cellule Grace", 25, 26),
        ("Mono", "Lokossa", "Houeyogbe", "Cellule Paix", 44, 29),
        ("Mono", "Lokossa", "Athieme", "Cellule Joie", 18, 19),
        ("Zou", "Abomey", "Bohicon", "Cellule Foi", 30, 31),
        ("Plateau", "Pobe", "Ketou", "Cellule Lumiere", 0, 14),
    ];

    let mut reports = Vec::new();
    for (region, group, district, cell, previous, recent) in cells {
        for week in 0..8i64 {
            let base: u32 = if week < 4 { recent } else { previous };
            if base == 0 {
                continue;
            }
            let total_present = base + (week % 3) as u32;
            let occurred_on = today - Duration::days(week * 7 + 2);
            reports.push(ImportedReport {
                source_key: Some(format!(
                    "seed-{}-{}",
                    cell.to_lowercase().replace(' ', "-"),
                    occurred_on
                )),
                record: AttendanceRecord {
                    occurred_on,
                    total_present,
                    region: region.to_string(),
                    group: group.to_string(),
                    district: district.to_string(),
                    cell_name: cell.to_string(),
                    bible_study: total_present / 2,
                    miracle_hour: total_present / 3,
                    sunday_service: total_present + 5,
                    registered_men: base / 3,
                    registered_women: base / 2,
                    registered_children: base / 4,
                    invited_count: (week % 2) as u32,
                    visits_count: 1 + (week % 3) as u32,
                },
            });
        }
    }

    import_reports(pool, &reports).await
}

async fn upsert_region(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO cell_trends.regions (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert region {name}"))?
    .get("id");
    Ok(id)
}

/// Upserts a child entity keyed by `(parent, name)` in one of the
/// group/district/cell tables.
async fn upsert_child(
    pool: &PgPool,
    level: HierarchyLevel,
    parent_column: &str,
    parent_id: Uuid,
    name: &str,
) -> anyhow::Result<Uuid> {
    let query = format!(
        "INSERT INTO {table} (id, {parent_column}, name) \
         VALUES ($1, $2, $3) \
         ON CONFLICT ({parent_column}, name) DO UPDATE SET name = EXCLUDED.name \
         RETURNING id",
        table = level.table(),
    );

    let id: Uuid = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(parent_id)
        .bind(name)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to upsert {level} {name}"))?
        .get("id");
    Ok(id)
}

async fn resolve_cell(pool: &PgPool, record: &AttendanceRecord) -> anyhow::Result<Uuid> {
    if let Some(level) = record.missing_level() {
        anyhow::bail!("report on {} has an empty {level} name", record.occurred_on);
    }

    let region_id = upsert_region(pool, &record.region).await?;
    let group_id =
        upsert_child(pool, HierarchyLevel::Group, "region_id", region_id, &record.group).await?;
    let district_id = upsert_child(
        pool,
        HierarchyLevel::District,
        "group_id",
        group_id,
        &record.district,
    )
    .await?;
    upsert_child(
        pool,
        HierarchyLevel::Cell,
        "district_id",
        district_id,
        &record.cell_name,
    )
    .await
}

fn to_db_count(value: u32) -> anyhow::Result<i32> {
    i32::try_from(value).with_context(|| format!("count {value} does not fit in the database"))
}

fn from_db_count(row: &sqlx::postgres::PgRow, column: &str) -> anyhow::Result<u32> {
    let value: i32 = row.get(column);
    u32::try_from(value).with_context(|| format!("negative {column} in stored report"))
}

pub async fn import_reports(pool: &PgPool, reports: &[ImportedReport]) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for report in reports {
        let record = &report.record;
        let cell_id = resolve_cell(pool, record).await?;
        let source_key = report
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO cell_trends.reports
            (id, cell_id, cell_date, total_present, bible_study, miracle_hour, sunday_service,
             registered_men, registered_women, registered_children, invited_count, visits_count,
             source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cell_id)
        .bind(record.occurred_on)
        .bind(to_db_count(record.total_present)?)
        .bind(to_db_count(record.bible_study)?)
        .bind(to_db_count(record.miracle_hour)?)
        .bind(to_db_count(record.sunday_service)?)
        .bind(to_db_count(record.registered_men)?)
        .bind(to_db_count(record.registered_women)?)
        .bind(to_db_count(record.registered_children)?)
        .bind(to_db_count(record.invited_count)?)
        .bind(to_db_count(record.visits_count)?)
        .bind(&source_key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert report {source_key}"))?;

        if result.rows_affected() > 0 {
            inserted += 1;
        } else {
            debug!(%source_key, "report already stored");
        }
    }

    info!(inserted, total = reports.len(), "imported reports");
    Ok(inserted)
}

/// Reports dated within `[start, end]` that fall inside `scope`.
pub async fn fetch_records(
    pool: &PgPool,
    scope: &ReportScope,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut query = String::from(
        "SELECT r.cell_date, r.total_present, r.bible_study, r.miracle_hour, r.sunday_service, \
         r.registered_men, r.registered_women, r.registered_children, r.invited_count, r.visits_count, \
         rg.name AS region, g.name AS group_name, d.name AS district, c.name AS cell_name \
         FROM cell_trends.reports r \
         JOIN cell_trends.cells c ON c.id = r.cell_id \
         JOIN cell_trends.districts d ON d.id = c.district_id \
         JOIN cell_trends.groups g ON g.id = d.group_id \
         JOIN cell_trends.regions rg ON rg.id = g.region_id \
         WHERE r.cell_date >= $1 AND r.cell_date <= $2",
    );

    let mut filters: Vec<&str> = Vec::new();
    for (column, value) in [
        ("rg.name", scope.region.as_deref()),
        ("g.name", scope.group.as_deref()),
        ("d.name", scope.district.as_deref()),
    ] {
        if let Some(value) = value {
            filters.push(value);
            query.push_str(&format!(" AND {column} = ${}", filters.len() + 2));
        }
    }
    query.push_str(" ORDER BY r.cell_date");

    let mut rows = sqlx::query(&query).bind(start).bind(end);
    for value in filters {
        rows = rows.bind(value);
    }

    let rows = rows
        .fetch_all(pool)
        .await
        .context("failed to fetch reports")?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        records.push(AttendanceRecord {
            occurred_on: row.get("cell_date"),
            total_present: from_db_count(&row, "total_present")?,
            region: row.get("region"),
            group: row.get("group_name"),
            district: row.get("district"),
            cell_name: row.get("cell_name"),
            bible_study: from_db_count(&row, "bible_study")?,
            miracle_hour: from_db_count(&row, "miracle_hour")?,
            sunday_service: from_db_count(&row, "sunday_service")?,
            registered_men: from_db_count(&row, "registered_men")?,
            registered_women: from_db_count(&row, "registered_women")?,
            registered_children: from_db_count(&row, "registered_children")?,
            invited_count: from_db_count(&row, "invited_count")?,
            visits_count: from_db_count(&row, "visits_count")?,
        });
    }

    debug!(count = records.len(), %start, %end, "fetched reports");
    Ok(records)
}

fn hierarchy_query(level: HierarchyLevel) -> &'static str {
    match level {
        HierarchyLevel::Region => {
            "SELECT id, name, NULL::TEXT AS parent FROM cell_trends.regions ORDER BY name"
        }
        HierarchyLevel::Group => {
            "SELECT g.id, g.name, p.name AS parent FROM cell_trends.groups g \
             JOIN cell_trends.regions p ON p.id = g.region_id ORDER BY p.name, g.name"
        }
        HierarchyLevel::District => {
            "SELECT d.id, d.name, p.name AS parent FROM cell_trends.districts d \
             JOIN cell_trends.groups p ON p.id = d.group_id ORDER BY p.name, d.name"
        }
        HierarchyLevel::Cell => {
            "SELECT c.id, c.name, p.name AS parent FROM cell_trends.cells c \
             JOIN cell_trends.districts p ON p.id = c.district_id ORDER BY p.name, c.name"
        }
    }
}

pub async fn list_hierarchy(pool: &PgPool) -> anyhow::Result<Vec<HierarchyEntity>> {
    let mut entities = Vec::new();

    for level in HierarchyLevel::ALL {
        let rows = sqlx::query(hierarchy_query(level))
            .fetch_all(pool)
            .await
            .with_context(|| format!("failed to list {level} entries"))?;

        for row in rows {
            entities.push(HierarchyEntity {
                id: row.get("id"),
                level,
                name: row.get("name"),
                parent: row.get("parent"),
            });
        }
    }

    Ok(entities)
}

/// Renames one hierarchy entity. Reports and child entities reference it by
/// id, so nothing else needs rewriting.
pub async fn rename_entity(
    pool: &PgPool,
    level: HierarchyLevel,
    id: Uuid,
    name: &str,
) -> anyhow::Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("new {level} name must not be empty");
    }

    let query = format!("UPDATE {} SET name = $1 WHERE id = $2", level.table());
    let result = sqlx::query(&query)
        .bind(name)
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to rename {level} {id}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("no {level} with id {id}");
    }

    info!(%level, %id, name, "renamed hierarchy entry");
    Ok(())
}
