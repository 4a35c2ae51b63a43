//! Sequential copy of a source image into a destination with live memory dumped into it.
//!
//! The source is copied section by section after the headers and the section table, which keeps
//! the accounting of moved sections simple: every section starts at the aligned end of the
//! previous one, and the data and bss sections are overwritten with live memory as they pass.

use alloc::string::ToString;

use log::debug;

use crate::{analysis::*, errors::*, image::*, memory::*, relocate::*, util::*};

/// Destination buffer with a write cursor.
///
/// Copies are bounds-checked against the destination. Alignment only moves the cursor and may
/// move it past the end of the destination, which then has to be extended with zeros.
#[derive(Debug)]
pub struct ChunkWriter<'o> {
    output: &'o mut [u8],
    cursor: u64,
}

impl<'o> ChunkWriter<'o> {
    pub fn new(output: &'o mut [u8]) -> Self { Self { output, cursor: 0 } }

    /// Returns the current write position.
    pub const fn cursor(&self) -> u64 { self.cursor }

    /// Move the write position.
    pub fn seek(&mut self, position: u64) -> u64 {
        self.cursor = position;
        self.cursor
    }

    /// Copy `size` bytes of the source image starting at `offset`.
    pub fn copy_from_source(
        &mut self, message: &str, source: &[u8], offset: u64, size: u64,
    ) -> Result<u64, DumpError> {
        debug!(
            "{}: offset in input {:#x?}, offset in output {:#x?}, size {:#x?}",
            message, offset, self.cursor, size
        );
        let bytes = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(offset + size).ok())
            .and_then(|(start, end)| source.get(start..end))
            .ok_or(DumpError::SourceOverflow {
                offset,
                size,
                len: source.len() as u64,
            })?;
        self.write(bytes)
    }

    /// Copy `size` bytes of live memory starting at `address`.
    pub fn copy_from_memory(
        &mut self, message: &str, memory: &dyn MemoryImage, address: u64, size: u64,
    ) -> Result<u64, DumpError> {
        debug!(
            "{}: address in process {:#x?}, offset in output {:#x?}, size {:#x?}",
            message, address, self.cursor, size
        );
        let bytes =
            memory.bytes(address, size).ok_or(DumpError::MemoryUnavailable(address, size))?;
        self.write(bytes)
    }

    /// Align the write position.
    pub fn align(&mut self, alignment: u32) -> u64 {
        self.cursor = aligned_to(self.cursor, alignment as u64);
        self.cursor
    }

    /// Align the write position and zero the skipped bytes inside the destination.
    pub fn align_and_zero(&mut self, alignment: u32) -> u64 {
        let aligned = aligned_to(self.cursor, alignment as u64);
        let len = self.output.len() as u64;
        let start = self.cursor.min(len) as usize;
        let end = aligned.min(len) as usize;
        self.output[start..end].fill(0);
        self.cursor = aligned;
        self.cursor
    }

    fn write(&mut self, bytes: &[u8]) -> Result<u64, DumpError> {
        let len = self.output.len() as u64;
        let end = self.cursor + bytes.len() as u64;
        if end > len {
            return Err(DumpError::OutputOverflow {
                offset: self.cursor,
                size: bytes.len() as u64,
                len,
            });
        }
        self.output[self.cursor as usize..end as usize].copy_from_slice(bytes);
        self.cursor = end;
        Ok(self.cursor)
    }
}

/// States of the image copy.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CopyState {
    CopyHeaders,
    CopySection(usize),
    CopyTrailer,
    Done,
}

/// Copies a source image into a destination buffer, dumping live memory into the data and bss
/// sections.
pub struct Copier<'s, 'o> {
    source:   &'s Image<'s>,
    memory:   &'s dyn MemoryImage,
    analysis: &'s Analysis,
    writer:   ChunkWriter<'o>,
    headers:  Headers,
    state:    CopyState,
}

impl<'s, 'o> Copier<'s, 'o> {
    pub fn new(
        source: &'s Image<'s>, memory: &'s dyn MemoryImage, analysis: &'s Analysis,
        output: &'o mut [u8],
    ) -> Self {
        Self {
            source,
            memory,
            analysis,
            writer: ChunkWriter::new(output),
            headers: source.headers(),
            state: CopyState::CopyHeaders,
        }
    }

    /// Run the copy to completion.
    ///
    /// # Returns
    /// Returns the destination headers with updated section table and header size, and the final
    /// size of the destination, which can differ from the size of the destination buffer.
    pub fn run(mut self) -> Result<(Headers, u64), DumpError> {
        while self.state != CopyState::Done {
            self.state = self.step()?;
        }
        Ok((self.headers, self.writer.cursor()))
    }

    /// Execute the current state and return the next one.
    pub fn step(&mut self) -> Result<CopyState, DumpError> {
        let section_count = self.headers.section_table.len();
        match self.state {
            CopyState::CopyHeaders => {
                self.copy_headers()?;
                Ok(if section_count > 0 {
                    CopyState::CopySection(0)
                } else {
                    CopyState::CopyTrailer
                })
            }
            CopyState::CopySection(index) => {
                self.copy_section(index)?;
                Ok(if index + 1 < section_count {
                    CopyState::CopySection(index + 1)
                } else {
                    CopyState::CopyTrailer
                })
            }
            CopyState::CopyTrailer => {
                self.copy_trailer()?;
                Ok(CopyState::Done)
            }
            CopyState::Done => Ok(CopyState::Done),
        }
    }

    fn copy_headers(&mut self) -> Result<(), DumpError> {
        let file_alignment = self.analysis.file_alignment;
        self.writer.copy_from_source(
            "copying headers and section table",
            self.source.data(),
            0,
            self.headers.offsets.section_table_end,
        )?;
        let size_of_headers = self.writer.align_and_zero(file_alignment);
        self.headers.windows_header.set_size_of_headers(size_of_headers as u32);
        debug!("size of headers: {:#x?}", size_of_headers);
        Ok(())
    }

    fn copy_section(&mut self, index: usize) -> Result<(), DumpError> {
        let file_alignment = self.analysis.file_alignment;
        let source_section = self.source.section_table()[index];
        let name = source_section.name().unwrap_or("?".to_string());
        let start = self.writer.cursor();

        if self.headers.section_table[index].has_raw_data() {
            self.headers.section_table[index].pointer_to_raw_data = start as u32;
        }

        self.writer.copy_from_source(
            &alloc::format!("copying raw data for {}", name),
            self.source.data(),
            source_section.pointer_to_raw_data as u64,
            source_section.size_of_raw_data as u64,
        )?;
        self.writer.align_and_zero(file_alignment);

        for placement in self.analysis.placements_in(index) {
            self.writer.seek(start + placement.section_offset);
            self.writer.copy_from_memory(
                &alloc::format!("dumping {} into {}", placement.kind, name),
                self.memory,
                placement.region.start,
                placement.region.size(),
            )?;

            let section = &mut self.headers.section_table[index];
            if placement.is_growing() {
                let end = self
                    .writer
                    .align(file_alignment)
                    .max(start + section.size_of_raw_data as u64);
                self.writer.seek(end);
                section.pointer_to_raw_data = start as u32;
                section.size_of_raw_data = (end - start) as u32;
                section.mark_dumped();
                debug!("resized section {}: {:#x?}", name, section);
            } else {
                self.writer.seek(start + section.size_of_raw_data as u64);
            }
        }

        self.writer.align(file_alignment);
        Ok(())
    }

    fn copy_trailer(&mut self) -> Result<(), DumpError> {
        let file_alignment = self.analysis.file_alignment as u64;
        let source = self.source.data();
        let last_end = match last_raw_data_end(self.source.section_table()) {
            0 => self.headers.offsets.section_table_end,
            end => end,
        };
        let offset = aligned_to(last_end, file_alignment);
        let size = (source.len() as u64).saturating_sub(offset);
        if size > 0 {
            self.writer
                .copy_from_source("copying remainder of executable", source, offset, size)?;
        }
        Ok(())
    }
}

/// Copy the source image into `output` as described by the analysis.
///
/// # Returns
/// Returns the destination headers and the final size of the destination.
pub fn copy_image(
    source: &Image, memory: &dyn MemoryImage, analysis: &Analysis, output: &mut [u8],
) -> Result<(Headers, u64), DumpError> {
    Copier::new(source, memory, analysis, output).run()
}
