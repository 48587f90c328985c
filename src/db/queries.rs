use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::ScraperType;
use crate::models::source::{
    JobSource, NewJobSource, NewRawScrape, RawScrape, RawScrapeStatus, ScrapingSchedule,
};

const SOURCE_COLUMNS: &str = "id, source_name, source_url, enabled_for_scrapping, scrape_type, \
                              scraping_schedule, created_at";

fn source_from_row(row: &PgRow) -> Result<JobSource, sqlx::Error> {
    let scrape_type: Option<String> = row.try_get("scrape_type")?;
    let schedule: Option<i64> = row.try_get("scraping_schedule")?;

    Ok(JobSource {
        id: row.try_get("id")?,
        source_name: row.try_get("source_name")?,
        source_url: row.try_get("source_url")?,
        enabled_for_scrapping: row.try_get("enabled_for_scrapping")?,
        // Unknown labels fall back to the default strategy at dispatch time.
        scrape_type: scrape_type.and_then(|t| t.parse::<ScraperType>().ok()),
        scraping_schedule: schedule.and_then(ScrapingSchedule::from_code),
        created_at: row.try_get("created_at")?,
    })
}

/// List job sources, optionally only those enabled for scraping.
pub async fn list_sources(pool: &PgPool, only_enabled: bool) -> Result<Vec<JobSource>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {SOURCE_COLUMNS}
        FROM job_source
        WHERE enabled_for_scrapping OR NOT $1
        ORDER BY id ASC
        "#
    ))
    .bind(only_enabled)
    .fetch_all(pool)
    .await?;

    rows.iter().map(source_from_row).collect()
}

/// Get a job source by ID
pub async fn find_source(pool: &PgPool, source_id: i64) -> Result<Option<JobSource>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {SOURCE_COLUMNS}
        FROM job_source
        WHERE id = $1
        "#
    ))
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(source_from_row).transpose()
}

/// Register a source. Returns `None` when the name is already taken.
pub async fn insert_source(pool: &PgPool, source: &NewJobSource) -> Result<Option<JobSource>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO job_source (source_name, source_url, enabled_for_scrapping, scrape_type, scraping_schedule)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_name) DO NOTHING
        RETURNING {SOURCE_COLUMNS}
        "#
    ))
    .bind(source.source_name.trim())
    .bind(source.source_url.as_deref())
    .bind(source.enabled_for_scrapping)
    .bind(source.scrape_type.map(|t| t.to_string()))
    .bind(source.scraping_schedule.map(ScrapingSchedule::code))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(source_from_row).transpose()
}

/// Archive the raw outcome of a scrape. Worker rows carry the job id.
pub async fn record_raw_scrape(
    pool: &PgPool,
    source_id: i64,
    job_id: Option<Uuid>,
    job_url: &str,
    raw_content: Option<&str>,
    error: Option<&str>,
    status: RawScrapeStatus,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO job_raw_scrape (job_source_id, job_id, job_url, raw_content, error, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(source_id)
    .bind(job_id)
    .bind(job_url)
    .bind(raw_content)
    .bind(error)
    .bind(status.code())
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

fn raw_scrape_from_row(row: &PgRow) -> Result<RawScrape, sqlx::Error> {
    let status_code: i64 = row.try_get("status")?;
    Ok(RawScrape {
        id: row.try_get("id")?,
        source_id: row.try_get("job_source_id")?,
        job_id: row.try_get("job_id")?,
        job_url: row.try_get("job_url")?,
        status_code,
        status: RawScrapeStatus::from_code(status_code),
        raw_content: row.try_get("raw_content")?,
        error: row.try_get("error")?,
        logged_in_time: row.try_get("logged_in_time")?,
    })
}

/// Store a posted raw scrape and return the stored row.
pub async fn insert_raw_scrape(pool: &PgPool, scrape: &NewRawScrape) -> Result<RawScrape, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO job_raw_scrape (job_source_id, job_url, raw_content, error, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, job_source_id, job_id, job_url, raw_content, error, status, logged_in_time
        "#,
    )
    .bind(scrape.source_id)
    .bind(scrape.job_url.trim())
    .bind(scrape.raw_content.as_deref())
    .bind(scrape.error.as_deref())
    .bind(scrape.status.code())
    .fetch_one(pool)
    .await?;

    raw_scrape_from_row(&row)
}

/// Most recent archived scrape of a URL, optionally successful ones only.
pub async fn latest_raw_scrape(
    pool: &PgPool,
    job_url: &str,
    only_successful: bool,
) -> Result<Option<RawScrape>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, job_source_id, job_id, job_url, raw_content, error, status, logged_in_time
        FROM job_raw_scrape
        WHERE job_url = $1 AND (status = $2 OR NOT $3)
        ORDER BY logged_in_time DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(job_url)
    .bind(RawScrapeStatus::Success.code())
    .bind(only_successful)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(raw_scrape_from_row).transpose()
}
