use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    domain::params::RenderParams,
    infra::workspace::{PREVIEW_FILE, Workspace},
};

use super::stage::RenderStage;

/// Argument vector shared by every stage of one render.
#[derive(Debug, Clone)]
pub struct RenderCommand {
    base: Vec<OsString>,
    workspace: Workspace,
}

impl RenderCommand {
    pub fn new(workspace: &Workspace, params: &RenderParams) -> Self {
        let mut base: Vec<OsString> = vec![
            "--json".into(),
            "--input".into(),
            workspace.source_path().into(),
            "--vis".into(),
            workspace.partial_path(PREVIEW_FILE).into(),
        ];
        if params.colors_only {
            base.push("--colors_only".into());
        }
        if !params.color_key.is_empty() {
            base.push("--color_key".into());
            base.extend(params.color_key.iter().map(|code| code.as_str().into()));
        }
        base.push("--scale".into());
        base.push(params.scale.to_string().into());
        if params.cut {
            base.push("--cut".into());
        }
        if params.hatch {
            base.push("--hatch".into());
        }
        if let Some(density) = params.hatch_density {
            base.push("--hatch_density".into());
            base.push(density.to_string().into());
        }

        Self {
            base,
            workspace: workspace.clone(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Where `stage` writes its artifact before promotion.
    pub fn staged_output(&self, stage: RenderStage) -> PathBuf {
        self.workspace.partial_path(stage.artifact().file_name())
    }

    pub fn staged_preview(&self) -> PathBuf {
        self.workspace.partial_path(PREVIEW_FILE)
    }

    pub fn stage_args(&self, stage: RenderStage) -> Vec<OsString> {
        let mut args = self.base.clone();
        args.push("--output".into());
        args.push(self.staged_output(stage).into());
        if let Some(flag) = stage.mode_flag() {
            args.push(flag.into());
        }
        args
    }

    /// Shell-equivalent rendering of a stage invocation, for logs.
    ///
    /// `#` starts a comment in POSIX shells, so colour codes are shown escaped.
    pub fn display_line(&self, renderer: &Path, stage: RenderStage) -> String {
        let mut line = renderer.display().to_string();
        for arg in self.stage_args(stage) {
            line.push(' ');
            line.push_str(&arg.to_string_lossy().replace('#', "\\#"));
        }
        line
    }
}
