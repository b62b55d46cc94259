use super::*;

table! {
    users (id) {
        id -> Integer,
        name -> Text,
        public_key -> Nullable<Text>,
        current_score -> Double,
        max_score -> Double,
        last_updated -> BigInt,
    }
}

#[derive(Queryable)]
#[diesel(table_name = users)]
struct AuthorPrivate {
    #[allow(dead_code)]
    id: i32,
    name: String,
    public_key: Option<String>,
    current_score: f64,
    max_score: f64,
    last_updated: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct AuthorPrivateNew<'a> {
    name: &'a str,
    public_key: Option<&'a str>,
}

fn private_to_public(p: AuthorPrivate) -> Result<AuthorRecord, String> {
    use conversions::*;
    Ok(AuthorRecord {
        name: p.name,
        verification_key: p.public_key,
        current_score: p.current_score,
        max_score: p.max_score,
        last_updated: i64_to_timestamp(p.last_updated)?,
    })
}

pub fn create_schema(conn: &mut SqliteConnection) -> Result<(), String> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            public_key TEXT,
            current_score REAL NOT NULL DEFAULT 0.0,
            max_score REAL NOT NULL DEFAULT 0.0,
            last_updated INTEGER NOT NULL DEFAULT 0
        );",
    )
    .map_err(|err| err.to_string())
}

/// Insert an author with default scores. Does nothing if the name is taken.
pub fn insert_author(
    conn: &mut SqliteConnection,
    input_name: &str,
    input_key: Option<&str>,
) -> Result<(), String> {
    use self::users::dsl::*;

    let insert_row = AuthorPrivateNew {
        name: conversions::non_empty_name(input_name)?,
        public_key: input_key,
    };

    diesel::insert_into(users)
        .values(&insert_row)
        .on_conflict(name)
        .do_nothing()
        .execute(conn)
        .map(|_| ())
        .map_err(|err| err.to_string())
}

pub fn get_author_by_name(
    conn: &mut SqliteConnection,
    input_name: &str,
) -> Result<Option<AuthorRecord>, String> {
    use self::users::dsl::*;

    users
        .filter(name.eq(input_name))
        .first::<AuthorPrivate>(conn)
        .optional()
        .map_err(|err| err.to_string())?
        .map(private_to_public)
        .transpose()
}

pub fn get_all_author_names(conn: &mut SqliteConnection) -> Result<Vec<String>, String> {
    use self::users::dsl::*;

    users
        .select(name)
        .order(name.asc())
        .load::<String>(conn)
        .map_err(|err| err.to_string())
}

/// Insert or update an author's score in one statement.
/// `max_score` only ever grows; `current_score` and `last_updated` are overwritten.
pub fn upsert_author_score(
    conn: &mut SqliteConnection,
    input_name: &str,
    score: f64,
    timestamp: i64,
) -> Result<AuthorRecord, String> {
    use diesel::sql_query;
    use diesel::sql_types::{BigInt, Double, Text};

    let input_name = conversions::non_empty_name(input_name)?;
    let score = conversions::finite_f64(score)?;
    let timestamp = conversions::i64_to_timestamp(timestamp)?;

    let query = "INSERT INTO users (name, current_score, max_score, last_updated)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            current_score = excluded.current_score,
            max_score = MAX(users.max_score, excluded.current_score),
            last_updated = excluded.last_updated;";

    let updated = conn
        .immediate_transaction::<AuthorPrivate, diesel::result::Error, _>(|conn| {
            use self::users::dsl::*;

            sql_query(query)
                .bind::<Text, _>(input_name)
                .bind::<Double, _>(score)
                .bind::<Double, _>(score)
                .bind::<BigInt, _>(timestamp)
                .execute(conn)?;

            users.filter(name.eq(input_name)).first::<AuthorPrivate>(conn)
        })
        .map_err(|err| err.to_string())?;

    private_to_public(updated)
}

pub fn get_all_authors_ranked(conn: &mut SqliteConnection) -> Result<Vec<AuthorRecord>, String> {
    use self::users::dsl::*;

    let items_private: Vec<AuthorPrivate> = users
        .order((current_score.desc(), name.asc()))
        .load(conn)
        .map_err(|err| err.to_string())?;

    items_private
        .into_iter()
        .map(private_to_public)
        .collect::<Result<Vec<AuthorRecord>, String>>()
}
