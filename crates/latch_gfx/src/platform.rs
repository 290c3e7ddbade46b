//! Target platforms and their default backend priority chains

use crate::BackendType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform the engine is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Ios,
    Android,
    Web,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Windows,
        Platform::MacOS,
        Platform::Linux,
        Platform::Ios,
        Platform::Android,
        Platform::Web,
    ];

    /// Platform of the current build target.
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Platform::Web
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else {
            Platform::Linux
        }
    }

    /// Default priority order, best first. Always ends in the software rasterizer.
    pub fn default_chain(self) -> &'static [BackendType] {
        use BackendType::*;
        match self {
            Platform::Windows => &[DirectX12, Vulkan, DirectX11, OpenGL, Software],
            Platform::MacOS => &[Metal, Vulkan, OpenGL, Software],
            Platform::Linux => &[Vulkan, OpenGL, OpenGLES, Software],
            Platform::Ios => &[Metal, OpenGLES, Software],
            Platform::Android => &[Vulkan, OpenGLES, Software],
            Platform::Web => &[WebGPU, WebGL, Software],
        }
    }

    /// Rank of `backend` in this platform's default chain (0 = tried first).
    pub fn default_rank(self, backend: BackendType) -> Option<u8> {
        self.default_chain()
            .iter()
            .position(|&candidate| candidate == backend)
            .map(|rank| rank as u8)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_chain_ends_in_software() {
        for platform in Platform::ALL {
            let chain = platform.default_chain();
            assert!(!chain.is_empty(), "{platform} has an empty chain");
            assert_eq!(chain.last(), Some(&BackendType::Software));
        }
    }

    #[test]
    fn default_rank_follows_chain_position() {
        assert_eq!(Platform::Windows.default_rank(BackendType::DirectX12), Some(0));
        assert_eq!(Platform::Windows.default_rank(BackendType::Software), Some(4));
        assert_eq!(Platform::Linux.default_rank(BackendType::Metal), None);
    }
}
