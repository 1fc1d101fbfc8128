use pgrepo::{
    Entity, EntityManager, FieldMap, OrmError, OrmResult, Params, RepoConfig, UpsertOptions,
    field_map, identity,
};
use serde::Deserialize;
use tokio_postgres::{Client, NoTls};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Counter {
    id: String,
    count: i64,
}

impl Entity for Counter {
    const TABLE: &'static str = "counters";

    fn to_external_map(&self) -> FieldMap {
        field_map! { "id" => self.id, "count" => self.count }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct User {
    id: i64,
    uuid: String,
    email: String,
    name: Option<String>,
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn to_external_map(&self) -> FieldMap {
        field_map! { "uuid" => self.uuid, "email" => self.email, "name" => self.name }
    }
}

const SCHEMA: &str = "
    CREATE TEMP TABLE counters (
        id TEXT PRIMARY KEY,
        count BIGINT NOT NULL
    );
    CREATE TEMP TABLE users (
        id BIGSERIAL PRIMARY KEY,
        uuid UUID NOT NULL UNIQUE DEFAULT gen_random_uuid(),
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE TEMP TABLE prices (
        id INT PRIMARY KEY,
        price NUMERIC(10, 2) NOT NULL
    );
";

/// Connect and create the temp schema, or `None` when no database is configured.
async fn connect(test: &str) -> OrmResult<Option<Client>> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("DATABASE_URL is not set; skipping {test}");
            return Ok(None);
        }
    };

    let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
        .await
        .map_err(OrmError::from_db_error)?;
    tokio::spawn(async move {
        let _ = connection.await;
    });

    client
        .batch_execute(SCHEMA)
        .await
        .map_err(OrmError::from_db_error)?;
    Ok(Some(client))
}

#[tokio::test]
async fn upsert_is_last_write_wins() -> OrmResult<()> {
    let Some(client) = connect("upsert_is_last_write_wins").await? else {
        return Ok(());
    };
    let counters = EntityManager::<Counter>::for_entity();
    let options = UpsertOptions::on_conflict(&["id"]);

    let first = counters
        .upsert(&client, &field_map! { "id" => "k1", "count" => 1 }, &options)
        .await?;
    assert_eq!(first.count, 1);

    let again = counters
        .upsert(&client, &field_map! { "id" => "k1", "count" => 1 }, &options)
        .await?;
    assert_eq!(again, first);

    let second = counters
        .upsert(&client, &field_map! { "id" => "k1", "count" => 2 }, &options)
        .await?;
    assert_eq!(second.count, 2);

    assert_eq!(counters.count(&client, &FieldMap::new()).await?, 1);
    let stored = counters.find_by_id(&client, "k1").await?;
    assert_eq!(stored.map(|c| c.count), Some(2));
    Ok(())
}

#[tokio::test]
async fn insert_round_trips_supplied_fields() -> OrmResult<()> {
    let Some(client) = connect("insert_round_trips_supplied_fields").await? else {
        return Ok(());
    };
    let users = EntityManager::<User>::for_entity();

    let user = users
        .insert(&client, &field_map! { "email" => "a@x.com", "name" => "Ann" })
        .await?;
    assert_eq!(user.email, "a@x.com");
    assert_eq!(user.name.as_deref(), Some("Ann"));

    let by_id = users.find_by_id(&client, user.id).await?;
    assert_eq!(by_id.as_ref(), Some(&user));

    let uuid = uuid::Uuid::parse_str(&user.uuid).map_err(|e| OrmError::Other(e.to_string()))?;
    let by_uuid = users.find_by_uuid(&client, uuid).await?;
    assert_eq!(by_uuid, Some(user));
    Ok(())
}

#[tokio::test]
async fn missing_rows_are_absent_not_errors() -> OrmResult<()> {
    let Some(client) = connect("missing_rows_are_absent_not_errors").await? else {
        return Ok(());
    };
    let users = EntityManager::<User>::for_entity();

    assert_eq!(users.find_by_id(&client, 404_i64).await?, None);

    let user = users
        .insert(&client, &field_map! { "email" => "gone@x.com" })
        .await?;
    assert!(users.delete_by_id(&client, user.id).await?);
    assert!(!users.delete_by_id(&client, user.id).await?);
    assert!(!users.exists(&client, &field_map! { "email" => "gone@x.com" }).await?);
    Ok(())
}

#[tokio::test]
async fn raw_statement_with_comment_binds_its_placeholders() -> OrmResult<()> {
    let Some(client) = connect("raw_statement_with_comment_binds_its_placeholders").await? else {
        return Ok(());
    };
    let counters = EntityManager::<Counter>::for_entity();
    for (id, count) in [("a", 1), ("b", 2), ("c", 3)] {
        counters
            .insert(&client, &field_map! { "id" => id, "count" => count })
            .await?;
    }

    let params: Params = [("id", serde_json::json!("b"))].into_iter().collect();
    let output = counters
        .raw_query(
            &client,
            "DELETE FROM counters -- don't touch the others\nWHERE id = @id",
            params,
        )
        .await?;
    assert_eq!(output.affected_rows, 1);
    assert_eq!(counters.count(&client, &FieldMap::new()).await?, 2);
    Ok(())
}

#[tokio::test]
async fn numeric_columns_bind_and_materialize() -> OrmResult<()> {
    let Some(client) = connect("numeric_columns_bind_and_materialize").await? else {
        return Ok(());
    };
    let prices = EntityManager::<FieldMap>::new("prices", Ok);

    let created = prices
        .insert(&client, &field_map! { "id" => 2, "price" => 1.5 })
        .await?;
    assert_eq!(created.get("price"), Some(&serde_json::json!("1.50")));

    let found = prices.find_by_id(&client, 2).await?;
    assert_eq!(found, Some(created));
    Ok(())
}

#[tokio::test]
async fn batch_insert_is_atomic() -> OrmResult<()> {
    let Some(mut client) = connect("batch_insert_is_atomic").await? else {
        return Ok(());
    };
    let users = EntityManager::<User>::for_entity();

    let rows = vec![
        field_map! { "email" => "a@x.com" },
        field_map! { "email" => "b@x.com" },
        field_map! { "email" => "a@x.com" },
    ];
    let err = users.batch_insert(&mut client, &rows).await.unwrap_err();
    assert!(err.is_unique_violation(), "unexpected error: {err}");
    assert_eq!(users.count(&client, &FieldMap::new()).await?, 0);

    let inserted = users.batch_insert(&mut client, &rows[..2]).await?;
    assert_eq!(inserted.len(), 2);
    assert_eq!(users.count(&client, &FieldMap::new()).await?, 2);
    Ok(())
}

#[tokio::test]
async fn transaction_rolls_back_on_error() -> OrmResult<()> {
    let Some(mut client) = connect("transaction_rolls_back_on_error").await? else {
        return Ok(());
    };
    let users = EntityManager::<User>::for_entity();

    let result = users
        .transaction(&mut client, |users, tx| {
            Box::pin(async move {
                users
                    .insert(tx, &field_map! { "email" => "t@x.com" })
                    .await?;
                Err::<(), _>(OrmError::Other("abort".into()))
            })
        })
        .await;
    assert!(result.is_err());
    assert_eq!(users.count(&client, &FieldMap::new()).await?, 0);

    let created = users
        .transaction(&mut client, |users, tx| {
            Box::pin(async move {
                users
                    .insert(tx, &field_map! { "email" => "t@x.com" })
                    .await
            })
        })
        .await?;
    assert_eq!(created.email, "t@x.com");
    assert_eq!(users.count(&client, &FieldMap::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn identifier_helpers_translate_between_key_spaces() -> OrmResult<()> {
    let Some(client) = connect("identifier_helpers_translate_between_key_spaces").await? else {
        return Ok(());
    };
    let config = RepoConfig::default();

    let external = identity::create_returning_external_id(
        &client,
        &config,
        "users",
        &field_map! { "email" => "id@x.com" },
    )
    .await?;

    let row = identity::find_by_external_id(&client, &config, "users", external)
        .await?
        .ok_or_else(|| OrmError::Other("created row not found".into()))?;
    assert_eq!(row.get("email"), Some(&serde_json::json!("id@x.com")));

    let key = identity::surrogate_key_for(&client, &config, "users", external)
        .await?
        .ok_or_else(|| OrmError::Other("no surrogate key".into()))?;
    let back = identity::external_id_for(&client, &config, "users", key).await?;
    assert_eq!(back, Some(external));

    let updated = identity::update_by_external_id(
        &client,
        &config,
        "users",
        external,
        &field_map! { "name" => "renamed" },
    )
    .await?;
    assert!(updated);
    assert!(identity::delete_by_external_id(&client, &config, "users", external).await?);
    assert!(!identity::delete_by_external_id(&client, &config, "users", external).await?);
    Ok(())
}
