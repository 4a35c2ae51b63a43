//! Dumping into executable files through memory-mapped input and output.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use log::{debug, info};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::{
    analysis::*, constants::*, copier::*, errors::*, image::*, memory::*, patch::*,
};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DumpError + '_ {
    move |source| DumpError::IOError {
        file: path.display().to_string(),
        source,
    }
}

/// Returns the output path with an executable extension appended if it lacks one.
///
/// The extension is compared ignoring ASCII case, so `out.EXE` is kept and `out.bin` becomes
/// `out.bin.exe`.
pub fn normalize_output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let is_executable = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case(EXECUTABLE_EXTENSION));
    if is_executable {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(EXECUTABLE_EXTENSION);
    PathBuf::from(name)
}

/// Memory-mapped output file.
struct Output {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
}

impl Output {
    /// Create the file at `path` with `size` zero bytes, replacing an existing file.
    fn create(path: &Path, size: u64) -> Result<Self, DumpError> {
        if path.exists() {
            debug!("removing existing output {}", path.display());
            std::fs::remove_file(path).map_err(io_error(path))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_error(path))?;
        file.set_len(size).map_err(io_error(path))?;
        // SAFETY: the file was just created and is not shared with other processes
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(io_error(path))?;
        Ok(Self {
            file,
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Change the size of the file, keeping its contents.
    fn resize(&mut self, size: u64) -> Result<(), DumpError> {
        debug!("resizing output from {:#x?} to {:#x?}", self.mmap.len(), size);
        self.mmap.flush().map_err(io_error(&self.path))?;
        self.file.set_len(size).map_err(io_error(&self.path))?;
        // SAFETY: see `Output::create`
        self.mmap =
            unsafe { MmapOptions::new().map_mut(&self.file) }.map_err(io_error(&self.path))?;
        Ok(())
    }

    fn finish(self) -> Result<PathBuf, DumpError> {
        self.mmap.flush().map_err(io_error(&self.path))?;
        Ok(self.path)
    }
}

/// Dump the live data and bss contents of `memory` into a copy of the executable at
/// `source_path`, written to `output_path`.
///
/// `.exe` is appended to the output path if it has a different extension. All preconditions are
/// checked before the output is created; an existing output file is replaced.
///
/// # Returns
/// Returns the path of the written executable, or an error naming the file that could not be
/// read, parsed or written.
pub fn dump_file<S: AsRef<Path>, O: AsRef<Path>>(
    source_path: S, output_path: O, memory: &dyn MemoryImage, options: &DumpOptions,
) -> Result<PathBuf, DumpError> {
    let source_path = source_path.as_ref();
    let output_path = normalize_output_path(output_path);
    info!("dumping from {} to {}", source_path.display(), output_path.display());

    let source_file = File::open(source_path).map_err(io_error(source_path))?;
    // SAFETY: the source is only read while the mapping is alive
    let source = unsafe { Mmap::map(&source_file) }.map_err(io_error(source_path))?;
    let image = Image::parse(&source[..])
        .map_err(|error| DumpError::invalid_image(source_path.display().to_string(), error))?;
    let analysis = Analysis::analyze(&image, memory, options)?;

    let mut output = Output::create(&output_path, analysis.output_size)?;
    let (headers, size) = copy_image(&image, memory, &analysis, &mut output.mmap)?;
    if size != output.mmap.len() as u64 {
        output.resize(size)?;
    }
    patch_headers(&mut output.mmap, &image, headers, options)?;

    info!("dumped image size: {:#x?}", size);
    output.finish()
}

/// Dump the memory image into a copy of the executable of the running program.
///
/// # Returns
/// Returns the path of the written executable, see [`dump_file`].
pub fn dump_current_exe<O: AsRef<Path>>(
    output_path: O, memory: &dyn MemoryImage, options: &DumpOptions,
) -> Result<PathBuf, DumpError> {
    let source_path = std::env::current_exe().map_err(|source| DumpError::IOError {
        file: "current executable".to_string(),
        source,
    })?;
    dump_file(source_path, output_path, memory, options)
}
