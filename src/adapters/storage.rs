use crate::domain::model::{Job, Project, ProjectId};
use crate::domain::ports::ResultStore;
use crate::utils::error::{Result, TrackerError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use zip::write::{FileOptions, ZipWriter};

pub const LOG_ENTRY: &str = "output.log";

/// In-memory results store for development and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    artifacts: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn upsert_project(&self, project: Project) -> Result<()> {
        let mut projects = self.projects.write().await;
        projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        let projects = self.projects.read().await;
        Ok(projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        let mut list: Vec<Project> = projects.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn upsert_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn list_jobs(&self, project: &ProjectId, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<Job> = jobs
            .values()
            .filter(|j| &j.project == project)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        list.truncate(limit);
        Ok(list)
    }

    async fn put_artifact(&self, job_id: &str, data: Vec<u8>) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(job_id.to_string(), data);
        Ok(())
    }

    async fn get_artifact(&self, job_id: &str) -> Result<Option<Vec<u8>>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(job_id).cloned())
    }
}

/// JSON documents on disk, cached in memory.
///
/// ```text
/// <root>/projects/<owner>/<repo>/project.json
/// <root>/projects/<owner>/<repo>/jobs/<job id>.json
/// <root>/artifacts/<job id>.zip
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    cache: InMemoryStore,
}

impl FileStore {
    /// Opens (creating if needed) the store at `base_path` and loads every document.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(base_path.join("projects")).await?;
        tokio::fs::create_dir_all(base_path.join("artifacts")).await?;

        let store = Self {
            base_path,
            cache: InMemoryStore::new(),
        };
        store.load().await?;
        Ok(store)
    }

    async fn load(&self) -> Result<()> {
        let mut project_count = 0;
        let mut job_count = 0;

        let projects_dir = self.base_path.join("projects");
        for owner_dir in read_dirs(&projects_dir).await? {
            for repo_dir in read_dirs(&owner_dir).await? {
                let project_file = repo_dir.join("project.json");
                if tokio::fs::try_exists(&project_file).await? {
                    match read_json::<Project>(&project_file).await {
                        Ok(project) => {
                            self.cache.upsert_project(project).await?;
                            project_count += 1;
                        }
                        Err(e) => {
                            tracing::warn!("Skipping unreadable project {:?}: {}", project_file, e)
                        }
                    }
                }

                let jobs_dir = repo_dir.join("jobs");
                if !tokio::fs::try_exists(&jobs_dir).await? {
                    continue;
                }
                let mut entries = tokio::fs::read_dir(&jobs_dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match read_json::<Job>(&path).await {
                        Ok(job) => {
                            self.cache.upsert_job(job).await?;
                            job_count += 1;
                        }
                        Err(e) => tracing::warn!("Skipping unreadable job {:?}: {}", path, e),
                    }
                }
            }
        }

        tracing::info!(
            "Loaded {} projects and {} jobs from {:?}",
            project_count,
            job_count,
            self.base_path
        );
        Ok(())
    }

    fn project_dir(&self, id: &ProjectId) -> Result<PathBuf> {
        if !id.is_valid() {
            return Err(TrackerError::StoreError {
                message: format!("refusing to store project '{}'", id),
            });
        }
        Ok(self
            .base_path
            .join("projects")
            .join(&id.owner)
            .join(&id.repo))
    }

    /// Job files are named by id, so only real job ids map to a path.
    fn job_file(&self, job_id: &str, extension: &str) -> Option<String> {
        Uuid::parse_str(job_id)
            .ok()
            .map(|id| format!("{}.{}", id.hyphenated(), extension))
    }

    fn artifact_path(&self, job_id: &str) -> Option<PathBuf> {
        self.job_file(job_id, "zip")
            .map(|name| self.base_path.join("artifacts").join(name))
    }
}

#[async_trait]
impl ResultStore for FileStore {
    async fn upsert_project(&self, project: Project) -> Result<()> {
        let path = self.project_dir(&project.id)?.join("project.json");
        write_atomic(&path, &serde_json::to_vec_pretty(&project)?).await?;
        self.cache.upsert_project(project).await
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        self.cache.get_project(id).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.cache.list_projects().await
    }

    async fn upsert_job(&self, job: Job) -> Result<()> {
        let name = self
            .job_file(&job.id, "json")
            .ok_or_else(|| TrackerError::StoreError {
                message: format!("refusing to store job '{}'", job.id),
            })?;
        let path = self.project_dir(&job.project)?.join("jobs").join(name);
        write_atomic(&path, &serde_json::to_vec_pretty(&job)?).await?;
        self.cache.upsert_job(job).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.cache.get_job(id).await
    }

    async fn list_jobs(&self, project: &ProjectId, limit: usize) -> Result<Vec<Job>> {
        self.cache.list_jobs(project, limit).await
    }

    async fn put_artifact(&self, job_id: &str, data: Vec<u8>) -> Result<()> {
        let path = self
            .artifact_path(job_id)
            .ok_or_else(|| TrackerError::StoreError {
                message: format!("refusing to store artifacts of job '{}'", job_id),
            })?;
        write_atomic(&path, &data).await
    }

    async fn get_artifact(&self, job_id: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.artifact_path(job_id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !tokio::fs::try_exists(dir).await? {
        return Ok(dirs);
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = tokio::fs::read(path).await?;
    serde_json::from_slice(&data).map_err(|e| TrackerError::StoreError {
        message: format!("{}: {}", path.display(), e),
    })
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Zip bundle of a job's output log and, when present, its results file.
pub fn bundle_artifacts(output: &str, results_file: Option<(&str, &[u8])>) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    zip.start_file::<_, ()>(LOG_ENTRY, FileOptions::default())?;
    zip.write_all(output.as_bytes())?;

    if let Some((name, data)) = results_file {
        zip.start_file::<_, ()>(name, FileOptions::default())?;
        zip.write_all(data)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Reads one entry of an artifact bundle.
pub fn read_bundle_entry(bundle: &[u8], name: &str) -> Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bundle))?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(Some(content))
}
