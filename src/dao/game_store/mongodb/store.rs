use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        COMPLETION_COLLECTION, GAME_COLLECTION, MongoCompletionDocument, MongoGameDocument,
        MongoPlayerDocument, MongoProgressDocument, MongoRuntimeDocument, PLAYER_COLLECTION,
        PROGRESS_COLLECTION, RUNTIME_COLLECTION, doc_id, puzzle_key,
    },
};
use crate::{
    dao::{
        game_store::GameStore,
        models::{
            GameEntity, GameTransition, PlayerEntity, PlayerPuzzleProgressEntity,
            PuzzleCompletionEntity, RuntimeStateEntity,
        },
        storage::StorageResult,
    },
    state::lifecycle::GameStatus,
};

/// Upsert races on the same progress key are retried this many times.
const PROGRESS_UPSERT_ATTEMPTS: u32 = 3;

/// [`GameStore`] persisted in MongoDB; atomicity comes from unique indexes and
/// filtered single-document updates.
#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn index(keys: Document, name: &str, unique: bool, sparse: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(Some(name.to_owned()))
                .unique(Some(unique))
                .sparse(Some(sparse))
                .build(),
        )
        .build()
}

fn collect_entities<D, E>(documents: Vec<D>) -> MongoResult<Vec<E>>
where
    E: TryFrom<D, Error = MongoDaoError>,
{
    documents.into_iter().map(E::try_from).collect()
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, IndexModel); 5] = [
            (
                GAME_COLLECTION,
                "active_code",
                index(doc! {"active_code": 1}, "game_active_code_idx", true, true),
            ),
            (
                GAME_COLLECTION,
                "status,created_at",
                index(
                    doc! {"status": 1, "created_at": -1},
                    "game_status_idx",
                    false,
                    false,
                ),
            ),
            (
                PLAYER_COLLECTION,
                "game_id,joined_at",
                index(
                    doc! {"game_id": 1, "joined_at": 1},
                    "player_game_idx",
                    false,
                    false,
                ),
            ),
            (
                PROGRESS_COLLECTION,
                "game_id",
                index(doc! {"game_id": 1}, "progress_game_idx", false, false),
            ),
            (
                COMPLETION_COLLECTION,
                "game_id,completed_at",
                index(
                    doc! {"game_id": 1, "completed_at": 1},
                    "completion_game_idx",
                    false,
                    false,
                ),
            ),
        ];

        let database = self.database().await;
        for (collection, index_name, model) in indexes {
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: index_name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &'static str) -> Collection<T> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn find_many<D, E>(
        &self,
        collection: &'static str,
        filter: Document,
        sort: Document,
    ) -> MongoResult<Vec<E>>
    where
        D: DeserializeOwned + Send + Sync + Unpin,
        E: TryFrom<D, Error = MongoDaoError>,
    {
        let documents: Vec<D> = self
            .collection::<D>(collection)
            .await
            .find(filter)
            .sort(sort)
            .await
            .map_err(|source| MongoDaoError::Read { collection, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read { collection, source })?;
        collect_entities(documents)
    }

    async fn find_one<D, E>(&self, collection: &'static str, filter: Document) -> MongoResult<Option<E>>
    where
        D: DeserializeOwned + Send + Sync + Unpin,
        E: TryFrom<D, Error = MongoDaoError>,
    {
        self.collection::<D>(collection)
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Read { collection, source })?
            .map(E::try_from)
            .transpose()
    }

    /// Insert a document; a unique index violation yields `false`.
    async fn insert_unique<D>(&self, collection: &'static str, document: D) -> MongoResult<bool>
    where
        D: Serialize + Send + Sync,
    {
        match self
            .collection::<D>(collection)
            .await
            .insert_one(document)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::Write { collection, source }),
        }
    }

    /// Conditional update; returns whether a document matched `filter`.
    async fn update_matching(
        &self,
        collection: &'static str,
        filter: Document,
        update: Document,
    ) -> MongoResult<bool> {
        let result = self
            .collection::<Document>(collection)
            .await
            .update_one(filter, update)
            .await
            .map_err(|source| MongoDaoError::Write { collection, source })?;
        Ok(result.matched_count > 0)
    }

    async fn transition_game(&self, id: Uuid, transition: GameTransition) -> MongoResult<bool> {
        let mut set = doc! {"status": transition.to.as_str()};
        if let Some(started_at) = transition.started_at {
            set.insert("started_at", DateTime::from_system_time(started_at));
        }
        if let Some(ends_at) = transition.ends_at {
            set.insert("ends_at", DateTime::from_system_time(ends_at));
        }
        let mut update = doc! {"$set": set};
        if transition.to == GameStatus::Abandoned {
            update.insert("$unset", doc! {"active_code": ""});
        }

        let filter = doc! {"_id": id.to_string(), "status": transition.from.as_str()};
        self.update_matching(GAME_COLLECTION, filter, update).await
    }

    async fn record_player_attempt(
        &self,
        player_id: Uuid,
        game_id: Uuid,
        slug: String,
        at: SystemTime,
    ) -> MongoResult<PlayerPuzzleProgressEntity> {
        let collection = self
            .collection::<MongoProgressDocument>(PROGRESS_COLLECTION)
            .await;
        let filter = doc_id(puzzle_key(player_id, &slug));
        let update = doc! {
            "$inc": {"attempts": 1},
            "$set": {"updated_at": DateTime::from_system_time(at)},
            "$setOnInsert": {
                "player_id": player_id.to_string(),
                "game_id": game_id.to_string(),
                "puzzle_slug": slug.as_str(),
                "solved": false,
                "score_awarded": 0_i64,
            },
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match collection
                .find_one_and_update(filter.clone(), update.clone())
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
            {
                Ok(Some(document)) => return document.try_into(),
                Ok(None) => {
                    return Err(MongoDaoError::Decode {
                        collection: PROGRESS_COLLECTION,
                        message: format!("upsert of `{}` returned no document", puzzle_key(player_id, &slug)),
                    });
                }
                // Two first attempts raced on the insert; the loser retries as an update.
                Err(err) if is_duplicate_key(&err) && attempt < PROGRESS_UPSERT_ATTEMPTS => {}
                Err(source) => {
                    return Err(MongoDaoError::Write {
                        collection: PROGRESS_COLLECTION,
                        source,
                    });
                }
            }
        }
    }

    /// Insert the ledger entry, then withdraw it when the game stopped running
    /// before the insert landed.
    async fn claim_completion(&self, completion: PuzzleCompletionEntity) -> MongoResult<bool> {
        let game_id = completion.game_id.to_string();
        let document = MongoCompletionDocument::from(completion);
        let key = document.key.clone();
        let completed_by = document.completed_by.clone();
        if !self.insert_unique(COMPLETION_COLLECTION, document).await? {
            return Ok(false);
        }

        let running = self
            .collection::<Document>(GAME_COLLECTION)
            .await
            .count_documents(doc! {"_id": game_id.as_str(), "status": GameStatus::Running.as_str()})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAME_COLLECTION,
                source,
            })?
            > 0;
        if running {
            return Ok(true);
        }

        self.collection::<Document>(COMPLETION_COLLECTION)
            .await
            .delete_one(doc! {"_id": key, "completed_by": completed_by})
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: COMPLETION_COLLECTION,
                source,
            })?;
        Ok(false)
    }

    async fn delete_game(&self, id: Uuid) -> MongoResult<bool> {
        let game_id = id.to_string();
        let deleted = self
            .collection::<Document>(GAME_COLLECTION)
            .await
            .delete_one(doc_id(game_id.as_str()))
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: GAME_COLLECTION,
                source,
            })?
            .deleted_count
            > 0;

        let owned = [
            (PLAYER_COLLECTION, doc! {"game_id": game_id.as_str()}),
            (RUNTIME_COLLECTION, doc_id(game_id.as_str())),
            (PROGRESS_COLLECTION, doc! {"game_id": game_id.as_str()}),
            (COMPLETION_COLLECTION, doc! {"game_id": game_id.as_str()}),
        ];
        for (collection, filter) in owned {
            self.collection::<Document>(collection)
                .await
                .delete_many(filter)
                .await
                .map_err(|source| MongoDaoError::Write { collection, source })?;
        }

        Ok(deleted)
    }
}

impl GameStore for MongoGameStore {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let document = MongoGameDocument::from(game);
            Ok(store.insert_unique(GAME_COLLECTION, document).await?)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoGameDocument, _>(GAME_COLLECTION, doc_id(id))
                .await?)
        })
    }

    fn find_game_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoGameDocument, _>(GAME_COLLECTION, doc! {"active_code": code})
                .await?)
        })
    }

    fn list_joinable_games(
        &self,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {
                "status": GameStatus::Waiting.as_str(),
                "player_count": {"$lt": i64::from(capacity)},
            };
            Ok(store
                .find_many::<MongoGameDocument, _>(GAME_COLLECTION, filter, doc! {"created_at": -1})
                .await?)
        })
    }

    fn list_games_by_status(
        &self,
        status: GameStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_many::<MongoGameDocument, _>(
                    GAME_COLLECTION,
                    doc! {"status": status.as_str()},
                    doc! {"created_at": -1},
                )
                .await?)
        })
    }

    fn transition_game(
        &self,
        id: Uuid,
        transition: GameTransition,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.transition_game(id, transition).await?) })
    }

    fn advance_puzzle_index(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_matching(
                    GAME_COLLECTION,
                    doc_id(id),
                    doc! {"$inc": {"current_puzzle_index": 1}},
                )
                .await?;
            Ok(())
        })
    }

    fn reserve_player_slot(
        &self,
        game_id: Uuid,
        capacity: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {
                "_id": game_id.to_string(),
                "status": {"$in": [GameStatus::Waiting.as_str(), GameStatus::Running.as_str()]},
                "player_count": {"$lt": i64::from(capacity)},
            };
            Ok(store
                .update_matching(GAME_COLLECTION, filter, doc! {"$inc": {"player_count": 1}})
                .await?)
        })
    }

    fn release_player_slot(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {"_id": game_id.to_string(), "player_count": {"$gt": 0}};
            store
                .update_matching(GAME_COLLECTION, filter, doc! {"$inc": {"player_count": -1}})
                .await?;
            Ok(())
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = MongoPlayerDocument::from(player);
            store
                .collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
                .await
                .insert_one(document)
                .await
                .map_err(|source| MongoDaoError::Write {
                    collection: PLAYER_COLLECTION,
                    source,
                })?;
            Ok(())
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoPlayerDocument, _>(PLAYER_COLLECTION, doc_id(id))
                .await?)
        })
    }

    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_many::<MongoPlayerDocument, _>(
                    PLAYER_COLLECTION,
                    doc! {"game_id": game_id.to_string()},
                    doc! {"joined_at": 1},
                )
                .await?)
        })
    }

    fn set_player_connected(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        connected: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {"_id": player_id.to_string(), "game_id": game_id.to_string()};
            Ok(store
                .update_matching(
                    PLAYER_COLLECTION,
                    filter,
                    doc! {"$set": {"is_connected": connected}},
                )
                .await?)
        })
    }

    fn add_player_score(
        &self,
        player_id: Uuid,
        points: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_matching(
                    PLAYER_COLLECTION,
                    doc_id(player_id),
                    doc! {"$inc": {"score_total": points}},
                )
                .await?;
            Ok(())
        })
    }

    fn reset_runtime_state(
        &self,
        state: RuntimeStateEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = MongoRuntimeDocument::try_from(state)?;
            store
                .collection::<MongoRuntimeDocument>(RUNTIME_COLLECTION)
                .await
                .replace_one(doc_id(&document.game_id), &document)
                .upsert(true)
                .await
                .map_err(|source| MongoDaoError::Write {
                    collection: RUNTIME_COLLECTION,
                    source,
                })?;
            Ok(())
        })
    }

    fn find_runtime_state(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RuntimeStateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoRuntimeDocument, _>(RUNTIME_COLLECTION, doc_id(game_id))
                .await?)
        })
    }

    fn record_game_attempt(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {"_id": game_id.to_string(), "current_puzzle_slug": slug};
            Ok(store
                .update_matching(RUNTIME_COLLECTION, filter, doc! {"$inc": {"attempts": 1}})
                .await?)
        })
    }

    fn advance_runtime(
        &self,
        game_id: Uuid,
        solved_slug: String,
        next_slug: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {"_id": game_id.to_string(), "current_puzzle_slug": solved_slug};
            let update = match next_slug {
                Some(next) => doc! {
                    "$set": {"current_puzzle_slug": next, "attempts": 0, "solved": false},
                    "$unset": {"puzzle_state": ""},
                },
                None => doc! {"$set": {"solved": true}},
            };
            store
                .update_matching(RUNTIME_COLLECTION, filter, update)
                .await?;
            Ok(())
        })
    }

    fn set_puzzle_state(
        &self,
        game_id: Uuid,
        puzzle_state: serde_json::Value,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let encoded =
                serde_json::to_string(&puzzle_state).map_err(|source| MongoDaoError::Encode {
                    collection: RUNTIME_COLLECTION,
                    source,
                })?;
            store
                .update_matching(
                    RUNTIME_COLLECTION,
                    doc_id(game_id),
                    doc! {"$set": {"puzzle_state": encoded}},
                )
                .await?;
            Ok(())
        })
    }

    fn record_player_attempt(
        &self,
        player_id: Uuid,
        game_id: Uuid,
        slug: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<PlayerPuzzleProgressEntity>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .record_player_attempt(player_id, game_id, slug, at)
                .await?)
        })
    }

    fn find_player_progress(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerPuzzleProgressEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoProgressDocument, _>(
                    PROGRESS_COLLECTION,
                    doc_id(puzzle_key(player_id, &slug)),
                )
                .await?)
        })
    }

    fn credit_player_puzzle(
        &self,
        player_id: Uuid,
        slug: String,
        points: i64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let filter = doc! {"_id": puzzle_key(player_id, &slug), "score_awarded": 0_i64};
            let update = doc! {"$set": {
                "solved": true,
                "score_awarded": points,
                "updated_at": DateTime::now(),
            }};
            Ok(store
                .update_matching(PROGRESS_COLLECTION, filter, update)
                .await?)
        })
    }

    fn mark_player_solved(
        &self,
        player_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_matching(
                    PROGRESS_COLLECTION,
                    doc_id(puzzle_key(player_id, &slug)),
                    doc! {"$set": {"solved": true, "updated_at": DateTime::now()}},
                )
                .await?;
            Ok(())
        })
    }

    fn claim_completion(
        &self,
        completion: PuzzleCompletionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.claim_completion(completion).await?) })
    }

    fn find_completion(
        &self,
        game_id: Uuid,
        slug: String,
    ) -> BoxFuture<'static, StorageResult<Option<PuzzleCompletionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_one::<MongoCompletionDocument, _>(
                    COMPLETION_COLLECTION,
                    doc_id(puzzle_key(game_id, &slug)),
                )
                .await?)
        })
    }

    fn list_completions(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PuzzleCompletionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .find_many::<MongoCompletionDocument, _>(
                    COMPLETION_COLLECTION,
                    doc! {"game_id": game_id.to_string()},
                    doc! {"completed_at": 1},
                )
                .await?)
        })
    }

    fn delete_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.delete_game(id).await?) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
