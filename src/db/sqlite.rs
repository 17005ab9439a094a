use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::adaptive::mastery::resolve_level;
use crate::adaptive::types::{
    EngagementAction, ExpansionClaim, InterestRecord, Interaction, LevelCounters, LevelProgress,
    MasteryLevel, MasteryRecord, NewTopic, PreferenceType, Question, QuestionDraft, QuestionId,
    Topic, TopicId, UnlockEvent, UnlockTrigger,
};
use crate::db::config::DbConfig;
use crate::db::sqlite_schema::{split_sql_statements, SCHEMA_SQL, SCHEMA_VERSION};
use crate::db::{DbInitError, Store, StoreError};

const TOPIC_COLUMNS: &str =
    "id, name, description, parent_id, difficulty_min, difficulty_max, created_at";

const MASTERY_COLUMNS: &str = "user_id, topic_id, current_level, \
    novice_seen, novice_correct, competent_seen, competent_correct, \
    proficient_seen, proficient_correct, expert_seen, expert_correct, \
    master_seen, master_correct, questions_answered, correct_answers, \
    is_unlocked, unlocked_at, proficiency_threshold_met, last_expanded_level, updated_at";

const QUESTION_COLUMNS: &str =
    "id, topic_id, prompt, options, correct_answer, explanation, difficulty, generated, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, DbInitError> {
        Self::from_config(&DbConfig::with_url(url)).await
    }

    pub async fn from_config(config: &DbConfig) -> Result<Self, DbInitError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| DbInitError::Config("DATABASE_URL is not set".to_string()))?;

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        if !in_memory {
            ensure_parent_dir(url)?;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DbInitError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(config.foreign_keys)
            .busy_timeout(config.busy_timeout);

        // every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DbInitError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), DbInitError> {
        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM _db_metadata WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await
                .unwrap_or(None);

        if version.as_deref() == Some(SCHEMA_VERSION) {
            return Ok(());
        }

        let statements = split_sql_statements(SCHEMA_SQL);
        let count = statements.len();
        for stmt in statements {
            sqlx::query(&stmt).execute(&self.pool).await?;
        }

        sqlx::query("INSERT OR REPLACE INTO _db_metadata (key, value) VALUES ('schema_version', ?)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        info!(statements = count, version = SCHEMA_VERSION, "sqlite schema applied");
        Ok(())
    }

    async fn fetch_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_topic).transpose()
    }
}

fn ensure_parent_dir(url: &str) -> Result<(), DbInitError> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidRow(format!("{column} out of range: {value}")))
}

fn counters(row: &SqliteRow, level: &str) -> Result<LevelCounters, StoreError> {
    let seen_col = format!("{level}_seen");
    let correct_col = format!("{level}_correct");
    Ok(LevelCounters {
        questions_seen: to_u32(row.try_get(seen_col.as_str())?, &seen_col)?,
        questions_correct: to_u32(row.try_get(correct_col.as_str())?, &correct_col)?,
    })
}

fn map_topic(row: &SqliteRow) -> Result<Topic, StoreError> {
    Ok(Topic {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent_id: row.try_get("parent_id")?,
        difficulty_min: row.try_get("difficulty_min")?,
        difficulty_max: row.try_get("difficulty_max")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_mastery(row: &SqliteRow) -> Result<MasteryRecord, StoreError> {
    let level: String = row.try_get("current_level")?;
    let last_expanded: Option<String> = row.try_get("last_expanded_level")?;
    Ok(MasteryRecord {
        user_id: row.try_get("user_id")?,
        topic_id: row.try_get("topic_id")?,
        current_level: resolve_level(&level),
        levels: LevelProgress {
            novice: counters(row, "novice")?,
            competent: counters(row, "competent")?,
            proficient: counters(row, "proficient")?,
            expert: counters(row, "expert")?,
            master: counters(row, "master")?,
        },
        questions_answered: to_u32(row.try_get("questions_answered")?, "questions_answered")?,
        correct_answers: to_u32(row.try_get("correct_answers")?, "correct_answers")?,
        is_unlocked: row.try_get("is_unlocked")?,
        unlocked_at: row.try_get("unlocked_at")?,
        proficiency_threshold_met: row.try_get("proficiency_threshold_met")?,
        // claim column: an unknown value must not reopen expansion
        last_expanded_level: last_expanded.as_deref().map(MasteryLevel::parse).transpose()?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_interest(row: &SqliteRow) -> Result<InterestRecord, StoreError> {
    let preference: String = row.try_get("preference_type")?;
    Ok(InterestRecord {
        user_id: row.try_get("user_id")?,
        topic_id: row.try_get("topic_id")?,
        interest_score: row.try_get("interest_score")?,
        interaction_count: to_u32(row.try_get("interaction_count")?, "interaction_count")?,
        time_spent: row.try_get("time_spent")?,
        preference_type: PreferenceType::parse(&preference),
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_unlock(row: &SqliteRow) -> Result<UnlockEvent, StoreError> {
    let trigger: String = row.try_get("unlock_trigger")?;
    Ok(UnlockEvent {
        user_id: row.try_get("user_id")?,
        parent_topic_id: row.try_get("parent_topic_id")?,
        unlocked_topic_id: row.try_get("unlocked_topic_id")?,
        trigger: UnlockTrigger::parse(&trigger)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown unlock trigger: {trigger}")))?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_question(row: &SqliteRow) -> Result<Question, StoreError> {
    let options: String = row.try_get("options")?;
    Ok(Question {
        id: row.try_get("id")?,
        topic_id: row.try_get("topic_id")?,
        prompt: row.try_get("prompt")?,
        options: serde_json::from_str(&options)?,
        correct_answer: row.try_get("correct_answer")?,
        explanation: row.try_get("explanation")?,
        difficulty: row.try_get("difficulty")?,
        generated: row.try_get("generated")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_interaction(row: &SqliteRow) -> Result<Interaction, StoreError> {
    let action: String = row.try_get("action")?;
    Ok(Interaction {
        user_id: row.try_get("user_id")?,
        topic_id: row.try_get("topic_id")?,
        question_id: row.try_get("question_id")?,
        action: EngagementAction::parse(&action)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown action: {action}")))?,
        is_correct: row.try_get("is_correct")?,
        time_spent: row.try_get("time_spent")?,
        difficulty: row.try_get("difficulty")?,
        created_at: row.try_get("created_at")?,
    })
}

fn level_str(level: Option<MasteryLevel>) -> Option<&'static str> {
    level.map(|l| l.as_str())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_topic(&self, topic: NewTopic) -> Result<(Topic, bool), StoreError> {
        let now: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            "INSERT INTO topics (name, description, parent_id, difficulty_min, difficulty_max, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(&topic.name)
        .bind(&topic.description)
        .bind(topic.parent_id)
        .bind(topic.difficulty_min)
        .bind(topic.difficulty_max)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            let id = result.last_insert_rowid();
            let stored = self.fetch_topic(id).await?.ok_or(StoreError::TopicNotFound(id))?;
            return Ok((stored, true));
        }

        let sql = format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE COALESCE(parent_id, 0) = ? AND lower(name) = lower(?)"
        );
        let row = sqlx::query(&sql)
            .bind(topic.parent_id.unwrap_or(0))
            .bind(&topic.name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::InvalidRow(format!("topic conflict without match: {}", topic.name)))?;
        Ok((map_topic(&row)?, false))
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        self.fetch_topic(id).await
    }

    async fn children(&self, parent_id: TopicId) -> Result<Vec<Topic>, StoreError> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE parent_id = ? ORDER BY id");
        let rows = sqlx::query(&sql).bind(parent_id).fetch_all(&self.pool).await?;
        rows.iter().map(map_topic).collect()
    }

    async fn roots(&self) -> Result<Vec<Topic>, StoreError> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE parent_id IS NULL ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_topic).collect()
    }

    async fn all_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_topic).collect()
    }

    async fn get_mastery(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Option<MasteryRecord>, StoreError> {
        let sql = format!("SELECT {MASTERY_COLUMNS} FROM mastery WHERE user_id = ? AND topic_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_mastery).transpose()
    }

    async fn get_or_create_mastery(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<MasteryRecord, StoreError> {
        sqlx::query(
            "INSERT INTO mastery (user_id, topic_id, current_level, updated_at) \
             VALUES (?, ?, 'novice', ?) ON CONFLICT (user_id, topic_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_mastery(user_id, topic_id)
            .await?
            .ok_or(StoreError::TopicNotFound(topic_id))
    }

    async fn list_mastery(&self, user_id: &str) -> Result<Vec<MasteryRecord>, StoreError> {
        let sql = format!("SELECT {MASTERY_COLUMNS} FROM mastery WHERE user_id = ? ORDER BY topic_id");
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(map_mastery).collect()
    }

    async fn update_mastery_progress(&self, record: &MasteryRecord) -> Result<(), StoreError> {
        let levels = &record.levels;
        sqlx::query(
            "INSERT INTO mastery (user_id, topic_id, current_level, \
                novice_seen, novice_correct, competent_seen, competent_correct, \
                proficient_seen, proficient_correct, expert_seen, expert_correct, \
                master_seen, master_correct, questions_answered, correct_answers, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id, topic_id) DO UPDATE SET \
                current_level = excluded.current_level, \
                novice_seen = excluded.novice_seen, novice_correct = excluded.novice_correct, \
                competent_seen = excluded.competent_seen, competent_correct = excluded.competent_correct, \
                proficient_seen = excluded.proficient_seen, proficient_correct = excluded.proficient_correct, \
                expert_seen = excluded.expert_seen, expert_correct = excluded.expert_correct, \
                master_seen = excluded.master_seen, master_correct = excluded.master_correct, \
                questions_answered = excluded.questions_answered, \
                correct_answers = excluded.correct_answers, \
                updated_at = excluded.updated_at",
        )
        .bind(&record.user_id)
        .bind(record.topic_id)
        .bind(record.current_level.as_str())
        .bind(levels.novice.questions_seen as i64)
        .bind(levels.novice.questions_correct as i64)
        .bind(levels.competent.questions_seen as i64)
        .bind(levels.competent.questions_correct as i64)
        .bind(levels.proficient.questions_seen as i64)
        .bind(levels.proficient.questions_correct as i64)
        .bind(levels.expert.questions_seen as i64)
        .bind(levels.expert.questions_correct as i64)
        .bind(levels.master.questions_seen as i64)
        .bind(levels.master.questions_correct as i64)
        .bind(record.questions_answered as i64)
        .bind(record.correct_answers as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<bool, StoreError> {
        let result = match claim {
            ExpansionClaim::First => {
                sqlx::query(
                    "UPDATE mastery SET proficiency_threshold_met = 1, updated_at = ? \
                     WHERE user_id = ? AND topic_id = ? AND proficiency_threshold_met = 0",
                )
                .bind(Utc::now())
                .bind(user_id)
                .bind(topic_id)
                .execute(&self.pool)
                .await?
            }
            ExpansionClaim::Progressive { level, previous } => {
                sqlx::query(
                    "UPDATE mastery SET last_expanded_level = ?, updated_at = ? \
                     WHERE user_id = ? AND topic_id = ? AND last_expanded_level IS ?",
                )
                .bind(level.as_str())
                .bind(Utc::now())
                .bind(user_id)
                .bind(topic_id)
                .bind(level_str(previous))
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn release_expansion(
        &self,
        user_id: &str,
        topic_id: TopicId,
        claim: ExpansionClaim,
    ) -> Result<(), StoreError> {
        match claim {
            ExpansionClaim::First => {
                sqlx::query(
                    "UPDATE mastery SET proficiency_threshold_met = 0, updated_at = ? \
                     WHERE user_id = ? AND topic_id = ?",
                )
                .bind(Utc::now())
                .bind(user_id)
                .bind(topic_id)
                .execute(&self.pool)
                .await?;
            }
            ExpansionClaim::Progressive { level, previous } => {
                sqlx::query(
                    "UPDATE mastery SET last_expanded_level = ?, updated_at = ? \
                     WHERE user_id = ? AND topic_id = ? AND last_expanded_level = ?",
                )
                .bind(level_str(previous))
                .bind(Utc::now())
                .bind(user_id)
                .bind(topic_id)
                .bind(level.as_str())
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn unlock_topic(&self, event: &UnlockEvent) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO unlock_events (user_id, parent_topic_id, unlocked_topic_id, unlock_trigger, created_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT (user_id, unlocked_topic_id) DO NOTHING",
        )
        .bind(&event.user_id)
        .bind(event.parent_topic_id)
        .bind(event.unlocked_topic_id)
        .bind(event.trigger.as_str())
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query(
                "INSERT INTO mastery (user_id, topic_id, current_level, is_unlocked, unlocked_at, updated_at) \
                 VALUES (?, ?, 'novice', 1, ?, ?) \
                 ON CONFLICT (user_id, topic_id) DO UPDATE SET \
                    is_unlocked = 1, \
                    unlocked_at = COALESCE(mastery.unlocked_at, excluded.unlocked_at)",
            )
            .bind(&event.user_id)
            .bind(event.unlocked_topic_id)
            .bind(event.created_at)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn unlocked_topics(&self, user_id: &str) -> Result<Vec<Topic>, StoreError> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, t.description, t.parent_id, t.difficulty_min, t.difficulty_max, t.created_at \
             FROM topics t JOIN unlock_events u ON u.unlocked_topic_id = t.id \
             WHERE u.user_id = ? ORDER BY t.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_topic).collect()
    }

    async fn unlock_events(&self, user_id: &str) -> Result<Vec<UnlockEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, parent_topic_id, unlocked_topic_id, unlock_trigger, created_at \
             FROM unlock_events WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_unlock).collect()
    }

    async fn get_interest(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Option<InterestRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, topic_id, interest_score, interaction_count, time_spent, preference_type, updated_at \
             FROM interests WHERE user_id = ? AND topic_id = ?",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_interest).transpose()
    }

    async fn save_interest(&self, record: &InterestRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO interests (user_id, topic_id, interest_score, interaction_count, time_spent, preference_type, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id, topic_id) DO UPDATE SET \
                interest_score = excluded.interest_score, \
                interaction_count = excluded.interaction_count, \
                time_spent = excluded.time_spent, \
                preference_type = excluded.preference_type, \
                updated_at = excluded.updated_at",
        )
        .bind(&record.user_id)
        .bind(record.topic_id)
        .bind(record.interest_score)
        .bind(record.interaction_count as i64)
        .bind(record.time_spent)
        .bind(record.preference_type.as_str())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_interests(&self, user_id: &str) -> Result<Vec<InterestRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, topic_id, interest_score, interaction_count, time_spent, preference_type, updated_at \
             FROM interests WHERE user_id = ? ORDER BY topic_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_interest).collect()
    }

    async fn scale_interests(&self, user_id: Option<&str>, factor: f64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE interests SET interest_score = MAX(0.0, MIN(1.0, interest_score * ?)), updated_at = ? \
             WHERE ? IS NULL OR user_id = ?",
        )
        .bind(factor)
        .bind(Utc::now())
        .bind(user_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_question(
        &self,
        topic_id: TopicId,
        draft: &QuestionDraft,
        generated: bool,
    ) -> Result<Question, StoreError> {
        let options = serde_json::to_string(&draft.options)?;
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO questions (topic_id, prompt, options, correct_answer, explanation, difficulty, generated, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(topic_id)
        .bind(&draft.prompt)
        .bind(&options)
        .bind(&draft.correct_answer)
        .bind(&draft.explanation)
        .bind(draft.difficulty)
        .bind(generated)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Question {
            id: result.last_insert_rowid(),
            topic_id,
            prompt: draft.prompt.clone(),
            options: draft.options.clone(),
            correct_answer: draft.correct_answer.clone(),
            explanation: draft.explanation.clone(),
            difficulty: draft.difficulty,
            generated,
            created_at: now,
        })
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_question).transpose()
    }

    async fn unused_questions(
        &self,
        user_id: &str,
        topic_id: TopicId,
    ) -> Result<Vec<Question>, StoreError> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.topic_id = ? \
             AND NOT EXISTS (SELECT 1 FROM served_questions s WHERE s.user_id = ? AND s.question_id = q.id) \
             ORDER BY q.id"
        );
        let rows = sqlx::query(&sql)
            .bind(topic_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_question).collect()
    }

    async fn mark_served(&self, user_id: &str, question_id: QuestionId) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO served_questions (user_id, question_id, served_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(question_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO interactions (user_id, topic_id, question_id, action, is_correct, time_spent, difficulty, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&interaction.user_id)
        .bind(interaction.topic_id)
        .bind(interaction.question_id)
        .bind(interaction.action.as_str())
        .bind(interaction.is_correct)
        .bind(interaction.time_spent)
        .bind(interaction.difficulty)
        .bind(interaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, topic_id, question_id, action, is_correct, time_spent, difficulty, created_at \
             FROM interactions WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_interaction).collect()
    }

    async fn last_answered_topic(&self, user_id: &str) -> Result<Option<TopicId>, StoreError> {
        let topic: Option<TopicId> = sqlx::query_scalar(
            "SELECT topic_id FROM interactions WHERE user_id = ? AND action = 'answer' \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(topic)
    }
}
