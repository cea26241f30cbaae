use sqlx::PgPool;
use uuid::Uuid;

use crate::profiles::repo_types::{AnalysisRecord, ProfileDefaults, ProfileRow};

/// Find a profile by user id.
pub async fn find_profile(db: &PgPool, user_id: Uuid) -> Result<Option<ProfileRow>, sqlx::Error> {
    sqlx::query_as::<_, ProfileRow>(
        r#"
        SELECT id, email, name, plan, scans_used, created_at
        FROM profiles
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Insert a default profile unless one already exists. Returns whether a row was written.
pub async fn insert_profile_if_absent(
    db: &PgPool,
    user_id: Uuid,
    defaults: &ProfileDefaults,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"
        INSERT INTO profiles (id, plan, scans_used)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(defaults.plan.as_str())
    .bind(defaults.scans_used)
    .execute(db)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Most recent analyses of a user, newest first.
pub async fn list_recent_analyses(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<AnalysisRecord>, sqlx::Error> {
    sqlx::query_as::<_, AnalysisRecord>(
        r#"
        SELECT id, user_id, product_name, ai_score AS health_score, created_at
        FROM analyses
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(db)
    .await
}
