//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Display names (owned by the profile subsystem, read for the dashboard)
CREATE TABLE IF NOT EXISTS profiles (
    user_id UUID PRIMARY KEY,
    full_name VARCHAR(255),
    created_at TIMESTAMPTZ DEFAULT NOW()
);

-- Login attempt windows, one live row per (identifier, endpoint)
CREATE TABLE IF NOT EXISTS rate_limit_attempts (
    id UUID PRIMARY KEY,
    ip_address VARCHAR(64) NOT NULL,
    endpoint VARCHAR(50) NOT NULL,
    attempt_count INT NOT NULL DEFAULT 1,
    first_attempt_at TIMESTAMPTZ NOT NULL,
    last_attempt_at TIMESTAMPTZ NOT NULL,
    UNIQUE (ip_address, endpoint)
);

-- Photo/email judgment items (owned by course content)
CREATE TABLE IF NOT EXISTS phishing_photo_tests (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    title VARCHAR(255) NOT NULL,
    description TEXT,
    image_url TEXT,
    category VARCHAR(100),
    is_phishing BOOLEAN NOT NULL,
    explanation TEXT NOT NULL,
    difficulty_level VARCHAR(50),
    indicators JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

-- Timed assessment runs
CREATE TABLE IF NOT EXISTS phishing_test_sessions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    total_questions INT NOT NULL,
    current_question INT NOT NULL DEFAULT 1,
    score INT NOT NULL DEFAULT 0,
    started_at TIMESTAMPTZ NOT NULL,
    time_limit_minutes INT NOT NULL,
    questions_data JSONB NOT NULL,
    status VARCHAR(20) NOT NULL,
    question_presented_at TIMESTAMPTZ NOT NULL,
    current_answered BOOLEAN NOT NULL DEFAULT false,
    is_completed BOOLEAN NOT NULL DEFAULT false,
    completed_at TIMESTAMPTZ
);

-- One row per answered question
CREATE TABLE IF NOT EXISTS phishing_photo_results (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL,
    user_id UUID NOT NULL,
    photo_test_id UUID NOT NULL,
    user_answer BOOLEAN NOT NULL,
    is_correct BOOLEAN NOT NULL,
    time_taken_seconds INT NOT NULL,
    question_number INT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (session_id, question_number)
);

-- Append-only security audit trail
CREATE TABLE IF NOT EXISTS security_incidents (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    incident_type VARCHAR(50) NOT NULL,
    severity VARCHAR(20) NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    ip_address VARCHAR(64),
    user_agent TEXT,
    geolocation_country VARCHAR(64),
    time_to_decision_seconds INT,
    missed_iocs JSONB NOT NULL DEFAULT '[]'::jsonb,
    raw_event_data JSONB
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_attempts_window ON rate_limit_attempts(ip_address, endpoint, first_attempt_at);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON phishing_test_sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_open ON phishing_test_sessions(is_completed);
CREATE INDEX IF NOT EXISTS idx_incidents_timestamp ON security_incidents(timestamp);
CREATE INDEX IF NOT EXISTS idx_incidents_user ON security_incidents(user_id);
"#;
