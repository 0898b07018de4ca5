//! # 文件存储工具
//!
//! 记录以 JSON 写入，先写临时文件再重命名，保证读者只会看到完整内容。
//! 私钥等敏感文件权限设置为 0600。

use crate::error::CaError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// 文件敏感程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// 仅所有者可读写
    Secret,
    Public,
}

/// 原子写入文件
pub fn write_atomic(path: &Path, contents: &[u8], mode: FileMode) -> Result<(), CaError> {
    let parent = path
        .parent()
        .ok_or_else(|| CaError::Storage(format!("无效的文件路径: {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| CaError::Storage(format!("创建目录 {} 失败: {}", parent.display(), e)))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CaError::Storage(format!("无效的文件名: {}", path.display())))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    fs::write(&tmp_path, contents)
        .map_err(|e| CaError::Storage(format!("写入 {} 失败: {}", tmp_path.display(), e)))?;

    #[cfg(unix)]
    {
        if mode == FileMode::Secret {
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| CaError::Storage(format!("设置文件权限失败: {}", e)))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        CaError::Storage(format!("重命名到 {} 失败: {}", path.display(), e))
    })
}

/// 以 JSON 原子写入
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CaError> {
    let serialized = serde_json::to_string_pretty(value)?;
    write_atomic(path, serialized.as_bytes(), FileMode::Public)
}

/// 读取 JSON，文件不存在时返回 None
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CaError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let value = serde_json::from_str(&content)
                .map_err(|e| CaError::Storage(format!("解析 {} 失败: {}", path.display(), e)))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CaError::Storage(format!("读取 {} 失败: {}", path.display(), e))),
    }
}

pub fn read_text(path: &Path) -> Result<String, CaError> {
    fs::read_to_string(path).map_err(|e| CaError::Storage(format!("读取 {} 失败: {}", path.display(), e)))
}

/// 删除文件，不存在时返回 false
pub fn remove_if_exists(path: &Path) -> Result<bool, CaError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CaError::Storage(format!("删除 {} 失败: {}", path.display(), e))),
    }
}

/// 校验用作文件名的外部标识
pub fn validate_identifier(id: &str) -> Result<(), CaError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CaError::InvalidRequest(format!("非法的标识: {:?}", id)))
    }
}
