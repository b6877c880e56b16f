//! `sample.info.v1.Info` implementation.

use tonic::{Request, Response, Status};

use crate::domain::{BuildInfo, SYSTEM_NAME};
use crate::infrastructure::grpc::proto::sample::info::v1::{
    self as pb, InfoRequest, InfoResponse, info_server::Info,
};

impl From<&BuildInfo> for pb::BuildInfo {
    fn from(build: &BuildInfo) -> Self {
        Self {
            version: build.version.clone(),
            commit: build.commit.clone(),
            date: build.date.clone(),
            os: build.os.clone(),
            arch: build.arch.clone(),
        }
    }
}

/// Reports the system name and build metadata.
#[derive(Debug, Clone, Default)]
pub struct InfoService {
    build: BuildInfo,
}

impl InfoService {
    /// Service reporting `build`.
    #[must_use]
    pub const fn new(build: BuildInfo) -> Self {
        Self { build }
    }
}

#[tonic::async_trait]
impl Info for InfoService {
    async fn info(&self, _request: Request<InfoRequest>) -> Result<Response<InfoResponse>, Status> {
        tracing::debug!(version = %self.build.version, "Info requested");
        Ok(Response::new(InfoResponse {
            system: SYSTEM_NAME.to_string(),
            version: self.build.version.clone(),
            build: Some(pb::BuildInfo::from(&self.build)),
        }))
    }
}
