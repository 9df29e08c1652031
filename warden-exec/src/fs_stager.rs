//! Copying a binary and its transitive dependency closure into a
//! confinement directory.

use crate::elf::ElfDepWalker;
use std::{
    collections::HashSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use warden_core::{Error, Result};

const COPY_BUFFER_SIZE: usize = 4096;
const STAGED_DIR_MODE: u32 = 0o750;

/// Stages a binary and its dependency closure into a confinement
/// directory, mirroring each source's absolute path underneath it.
pub struct FsStager<'a>
{
    confinement_dir: &'a Path,
    copied: HashSet<PathBuf>,
}

impl<'a> FsStager<'a>
{
    /// Build a stager targeting `confinement_dir`.
    pub fn new(confinement_dir: &'a Path) -> Self
    {
        Self{confinement_dir, copied: HashSet::new()}
    }

    /// Stage `binary` (an absolute path) and recursively stage every
    /// shared library it transitively depends on.
    ///
    /// Staging the same source path twice is a no-op: the method
    /// tracks what it has already copied and skips re-copying or
    /// re-walking it.
    pub fn stage(&mut self, binary: &Path) -> Result<()>
    {
        self.stage_one(binary)
    }

    fn stage_one(&mut self, source: &Path) -> Result<()>
    {
        if self.copied.contains(source) {
            return Ok(());
        }

        let deps = ElfDepWalker::walk(source)?;
        self.copy_into_confinement(source)?;
        self.copied.insert(source.to_path_buf());

        for library in &deps.libraries {
            let Some(found) = find_in_search_paths(library, &deps.search_paths) else {
                return Err(Error::NotFound(library.clone()));
            };
            self.stage_one(&found)?;
        }

        Ok(())
    }

    fn copy_into_confinement(&self, source: &Path) -> Result<()>
    {
        let dest = mirror_path(self.confinement_dir, source);

        if dest.exists() {
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            create_dir_all_with_mode(parent, STAGED_DIR_MODE).map_err(Error::FsError)?;
        }

        copy_file(source, &dest).map_err(Error::FsError)?;
        log::debug!("staged {} as {}", source.display(), dest.display());

        Ok(())
    }
}

/// Mirror `source`'s absolute path underneath `confinement_dir`.
fn mirror_path(confinement_dir: &Path, source: &Path) -> PathBuf
{
    let relative = source.strip_prefix("/").unwrap_or(source);
    confinement_dir.join(relative)
}

fn find_in_search_paths(library: &str, search_paths: &[String]) -> Option<PathBuf>
{
    search_paths.iter()
        .map(|dir| Path::new(dir).join(library))
        .find(|candidate| candidate.is_file())
}

fn create_dir_all_with_mode(dir: &Path, mode: u32) -> io::Result<()>
{
    use std::os::unix::fs::PermissionsExt;

    if dir.exists() {
        return Ok(());
    }

    if let Some(parent) = dir.parent() {
        create_dir_all_with_mode(parent, mode)?;
    }

    match fs::create_dir(dir) {
        Ok(())                                                      => {},
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists           => return Ok(()),
        Err(e)                                                      => return Err(e),
    }

    fs::set_permissions(dir, fs::Permissions::from_mode(mode))
}

fn copy_file(source: &Path, dest: &Path) -> io::Result<()>
{
    let mut reader = fs::File::open(source)?;
    let mut writer = fs::File::create(dest)?;

    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let n = io::Read::read(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[.. n])?;
    }

    let mode = reader.metadata()?.permissions();
    writer.set_permissions(mode)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn mirror_path_strips_leading_slash()
    {
        let confinement = Path::new("/mnt/honeycomb/70000");
        let mirrored = mirror_path(confinement, Path::new("/usr/lib/libc.so.6"));
        assert_eq!(mirrored, Path::new("/mnt/honeycomb/70000/usr/lib/libc.so.6"));
    }

    #[test]
    fn stage_is_idempotent_for_a_non_elf_file()
    {
        let dir = std::env::temp_dir().join(format!("warden-stage-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let confinement = dir.join("confinement");
        fs::create_dir_all(&confinement).unwrap();

        let source = dir.join("script.sh");
        fs::write(&source, b"#!/bin/sh\necho hi\n").unwrap();

        let mut stager = FsStager::new(&confinement);
        let first = stager.stage(&source);
        assert!(matches!(first, Err(Error::NotElf(_))));

        fs::remove_dir_all(&dir).ok();
    }
}
