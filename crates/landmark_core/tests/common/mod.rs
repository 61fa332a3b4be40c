//! Shared fixtures: an in-memory scripted landmark remote.
#![allow(dead_code)]

use async_trait::async_trait;
use landmark_core::db::{open_db_in_memory, share, SharedConnection};
use landmark_core::remote::{LandmarkRemote, LandmarkWrite, RemoteError, RemoteResult};
use landmark_core::{Landmark, LandmarkId, LandmarkService, ServiceSettings};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List,
    Create(String),
    Update(LandmarkId, String),
    Delete(LandmarkId),
}

#[derive(Default)]
struct FakeState {
    server: Vec<Landmark>,
    next_id: LandmarkId,
    offline: bool,
    delay: Option<Duration>,
    next_failures: VecDeque<u16>,
    list_failures: VecDeque<u16>,
    title_failures: HashMap<String, u16>,
    calls: Vec<Call>,
}

/// Authoritative server stand-in with scriptable failures.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.state.lock().unwrap().next_id = 1;
        Arc::new(remote)
    }

    /// Adds a record directly on the server side.
    pub fn seed(&self, title: &str, lat: f64, lon: f64, created_at: i64) -> Landmark {
        let mut state = self.state.lock().unwrap();
        let mut landmark = Landmark::new(title, lat, lon).unwrap();
        landmark.id = Some(state.next_id);
        landmark.is_synced = true;
        landmark.created_at = created_at;
        landmark.updated_at = created_at;
        state.next_id += 1;
        state.server.push(landmark.clone());
        landmark
    }

    pub fn remove(&self, id: LandmarkId) {
        self.state
            .lock()
            .unwrap()
            .server
            .retain(|landmark| landmark.id != Some(id));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Fails the next mutation call with `code`.
    pub fn fail_next(&self, code: u16) {
        self.state.lock().unwrap().next_failures.push_back(code);
    }

    /// Fails the next list call with `code`.
    pub fn fail_next_list(&self, code: u16) {
        self.state.lock().unwrap().list_failures.push_back(code);
    }

    /// Fails every create/update carrying `title` with `code`.
    pub fn fail_title(&self, title: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .title_failures
            .insert(title.to_string(), code);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.next_failures.clear();
        state.list_failures.clear();
        state.title_failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::List)
            .collect()
    }

    pub fn server(&self) -> Vec<Landmark> {
        self.state.lock().unwrap().server.clone()
    }

    async fn enter(&self, call: Call, title: Option<&str>) -> RemoteResult<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            let is_mutation = call != Call::List;
            state.calls.push(call);
            if state.offline {
                return Err(RemoteError::Unreachable("connection refused".to_string()));
            }
            let code = if is_mutation {
                title
                    .and_then(|title| state.title_failures.get(title).copied())
                    .or_else(|| state.next_failures.pop_front())
            } else {
                state.list_failures.pop_front()
            };
            if let Some(code) = code {
                return Err(RemoteError::Status {
                    code,
                    message: "scripted failure".to_string(),
                });
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl LandmarkRemote for FakeRemote {
    async fn get_landmarks(&self) -> RemoteResult<Vec<Landmark>> {
        self.enter(Call::List, None).await?;
        Ok(self.server())
    }

    async fn create_landmark(&self, write: &LandmarkWrite) -> RemoteResult<Landmark> {
        self.enter(Call::Create(write.title.clone()), Some(&write.title))
            .await?;
        let mut state = self.state.lock().unwrap();
        let mut landmark = Landmark::new(&write.title, write.latitude, write.longitude)
            .map_err(|err| RemoteError::Status {
                code: 422,
                message: err.to_string(),
            })?;
        let id = state.next_id;
        state.next_id += 1;
        landmark.id = Some(id);
        landmark.is_synced = true;
        landmark.image = write
            .image_path
            .as_ref()
            .map(|_| format!("https://img.example/{id}.jpg"));
        state.server.push(landmark.clone());
        Ok(landmark)
    }

    async fn update_landmark(
        &self,
        id: LandmarkId,
        write: &LandmarkWrite,
    ) -> RemoteResult<Landmark> {
        self.enter(Call::Update(id, write.title.clone()), Some(&write.title))
            .await?;
        let mut state = self.state.lock().unwrap();
        let landmark = state
            .server
            .iter_mut()
            .find(|landmark| landmark.id == Some(id))
            .ok_or(RemoteError::NotFound)?;
        let updated = Landmark::new(&write.title, write.latitude, write.longitude)
            .map_err(|err| RemoteError::Status {
                code: 422,
                message: err.to_string(),
            })?;
        landmark.title = updated.title;
        landmark.coordinates = updated.coordinates;
        landmark.touch();
        Ok(landmark.clone())
    }

    async fn delete_landmark(&self, id: LandmarkId) -> RemoteResult<()> {
        self.enter(Call::Delete(id), None).await?;
        let mut state = self.state.lock().unwrap();
        let before = state.server.len();
        state.server.retain(|landmark| landmark.id != Some(id));
        if state.server.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        remote_timeout: Duration::from_secs(2),
        drain_on_refresh_failure: true,
    }
}

pub fn memory_conn() -> SharedConnection {
    share(open_db_in_memory().unwrap())
}

pub fn service_with(remote: &Arc<FakeRemote>, conn: SharedConnection) -> LandmarkService {
    let remote: Arc<dyn LandmarkRemote> = remote.clone();
    LandmarkService::new(conn, remote, settings()).unwrap()
}

pub fn service(remote: &Arc<FakeRemote>) -> LandmarkService {
    service_with(remote, memory_conn())
}
