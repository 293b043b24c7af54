// SPDX-License-Identifier: CEPL-1.0
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ember_core::{Arena, MIN_ALIGN};

use crate::error::AssetError;

/// Reads a whole file into scratch memory taken from `arena`.
pub fn read_file_into<'a>(arena: &'a Arena<'_>, path: &Path) -> Result<&'a [u8], AssetError> {
    let io = |source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io)?;
    let len = file.metadata().map_err(io)?.len() as usize;
    let buf = arena.alloc(len, MIN_ALIGN)?;
    file.read_exact(buf).map_err(io)?;

    tracing::trace!(path = %path.display(), bytes = len, "asset read");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_into_arena_and_rewinds() {
        let path = std::env::temp_dir().join(format!("ember-load-{}.bin", std::process::id()));
        std::fs::write(&path, b"sixteen bytes!!!").unwrap();

        let mut arena = Arena::new(64).unwrap();
        {
            let scope = arena.begin_temp();
            let bytes = read_file_into(&scope, &path).unwrap();
            assert_eq!(bytes, b"sixteen bytes!!!");
            assert_eq!(scope.used(), 16);
        }
        assert_eq!(arena.used(), 0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_names_path() {
        let arena = Arena::new(64).unwrap();
        let err = read_file_into(&arena, Path::new("/nonexistent/ember.mesh")).unwrap_err();
        assert!(matches!(err, AssetError::Io { ref path, .. } if path.ends_with("ember.mesh")));
    }

    #[test]
    fn oversized_file_exhausts_arena() {
        let path = std::env::temp_dir().join(format!("ember-big-{}.bin", std::process::id()));
        std::fs::write(&path, vec![7u8; 5000]).unwrap();
        let arena = Arena::new(4096).unwrap();
        let err = read_file_into(&arena, &path).unwrap_err();
        assert!(matches!(err, AssetError::Scratch(_)));
        std::fs::remove_file(&path).unwrap();
    }
}
