// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native print backend: the Windows print spooler.
//
// The spooler call sequence lives in `spool`, written against the
// `SpoolerApi` trait so it can be exercised without a Windows host.
// `WindowsSpooler` binds the trait to winspool through `windows-sys`.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use printmeter_core::error::{PrintmeterError, Result};
use printmeter_core::types::PrinterInfo;

use crate::dispatcher::{DispatchRequest, PrintDispatcher};

/// Bytes handed to the spooler per write call.
pub const WRITE_CHUNK_SIZE: usize = 32 * 1024;

/// Document name used when a request has no job name.
pub const DEFAULT_DOC_NAME: &str = "print-job";

/// Spooler datatype for pre-rendered bytes.
pub const RAW_DATATYPE: &str = "RAW";

/// The spooler calls one job needs, in the order they are made.
pub trait SpoolerApi: Send + Sync + 'static {
    type Handle;

    fn open(&self, printer: &str) -> io::Result<Self::Handle>;
    /// Start a document; returns the spooler job number.
    fn start_doc(&self, handle: &Self::Handle, doc_name: &str, datatype: &str) -> io::Result<u32>;
    fn start_page(&self, handle: &Self::Handle) -> io::Result<()>;
    /// Write part of a chunk; returns how many bytes were accepted.
    fn write(&self, handle: &Self::Handle, chunk: &[u8]) -> io::Result<usize>;
    fn end_page(&self, handle: &Self::Handle) -> io::Result<()>;
    fn end_doc(&self, handle: &Self::Handle) -> io::Result<()>;
    fn close(&self, handle: Self::Handle);
    /// Names of local and connected printers.
    fn enumerate(&self) -> io::Result<Vec<String>>;
}

fn step_failed(step: &str, err: impl std::fmt::Display) -> PrintmeterError {
    error!(step, error = %err, "spooler step failed");
    PrintmeterError::DispatchFailed(format!("{step}: {err}"))
}

/// Spool one document read from `source`; returns the job number.
///
/// A failed step ends whatever page or document is already open, in
/// reverse order, and the printer is always closed. Bytes already written
/// are not retried.
pub fn spool<A: SpoolerApi, R: Read>(
    api: &A,
    printer: &str,
    job_name: Option<&str>,
    mut source: R,
) -> Result<u32> {
    if printer.is_empty() {
        return Err(PrintmeterError::DispatchFailed("missing printer name".into()));
    }

    let handle = api.open(printer).map_err(|e| step_failed("open printer", e))?;
    let result = spool_document(api, &handle, job_name, &mut source);
    api.close(handle);
    result
}

fn spool_document<A: SpoolerApi, R: Read>(
    api: &A,
    handle: &A::Handle,
    job_name: Option<&str>,
    source: &mut R,
) -> Result<u32> {
    let doc_name = job_name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_DOC_NAME);
    let job = api
        .start_doc(handle, doc_name, RAW_DATATYPE)
        .map_err(|e| step_failed("start doc", e))?;

    if let Err(e) = api.start_page(handle) {
        let _ = api.end_doc(handle);
        return Err(step_failed("start page", e));
    }

    if let Err(e) = write_all_chunks(api, handle, source) {
        let _ = api.end_page(handle);
        let _ = api.end_doc(handle);
        return Err(e);
    }

    if let Err(e) = api.end_page(handle) {
        let _ = api.end_doc(handle);
        return Err(step_failed("end page", e));
    }

    api.end_doc(handle).map_err(|e| step_failed("end doc", e))?;
    Ok(job)
}

/// Copy `source` to the spooler in chunks until end of input.
fn write_all_chunks<A: SpoolerApi, R: Read>(
    api: &A,
    handle: &A::Handle,
    source: &mut R,
) -> Result<u64> {
    let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(step_failed("read document", e)),
        };

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let written = api
                .write(handle, chunk)
                .map_err(|e| step_failed("write printer", e))?;
            if written == 0 {
                return Err(step_failed("write printer", "spooler accepted no bytes"));
            }
            chunk = &chunk[written.min(chunk.len())..];
            total += written as u64;
        }
    }
    debug!(bytes = total, "document spooled");
    Ok(total)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Dispatcher that hands documents to a local spooler.
pub struct SpoolerDispatcher<A> {
    api: Arc<A>,
}

impl<A: SpoolerApi> SpoolerDispatcher<A> {
    pub fn new(api: A) -> Self {
        Self { api: Arc::new(api) }
    }

    /// Installed printers with non-empty names; the URI is the name.
    pub fn installed_printers(&self) -> Result<Vec<PrinterInfo>> {
        let names = self
            .api
            .enumerate()
            .map_err(|e| PrintmeterError::DispatchFailed(format!("enumerate printers: {e}")))?;
        Ok(names
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(|name| PrinterInfo {
                uri: name.clone(),
                name,
            })
            .collect())
    }
}

impl<A: SpoolerApi> PrintDispatcher for SpoolerDispatcher<A> {
    #[instrument(skip(self, request), fields(printer = %request.printer, bytes = request.document.len()))]
    async fn send(&self, request: DispatchRequest) -> Result<String> {
        let api = Arc::clone(&self.api);
        let job = tokio::task::spawn_blocking(move || {
            spool(
                api.as_ref(),
                &request.printer,
                request.job_name.as_deref(),
                request.document.as_slice(),
            )
        })
        .await
        .map_err(|e| PrintmeterError::DispatchFailed(format!("spooler task: {e}")))??;

        info!(job, "spooler accepted job");
        Ok(job.to_string())
    }

    async fn list_printers(&self, _host: &str) -> Result<Vec<PrinterInfo>> {
        let api = Arc::clone(&self.api);
        tokio::task::spawn_blocking(move || SpoolerDispatcher { api }.installed_printers())
            .await
            .map_err(|e| PrintmeterError::DispatchFailed(format!("spooler task: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// winspool binding
// ---------------------------------------------------------------------------

#[cfg(windows)]
pub use windows::WindowsSpooler;

#[cfg(windows)]
mod windows {
    use std::io;
    use std::ptr;

    use windows_sys::Win32::Graphics::Printing::{
        ClosePrinter, DOC_INFO_1W, EndDocPrinter, EndPagePrinter, EnumPrintersW, OpenPrinterW,
        PRINTER_ENUM_CONNECTIONS, PRINTER_ENUM_LOCAL, PRINTER_HANDLE, PRINTER_INFO_4W,
        StartDocPrinterW, StartPagePrinter, WritePrinter,
    };

    use super::SpoolerApi;

    /// winspool.drv through `windows-sys`.
    pub struct WindowsSpooler;

    /// Open printer handle.
    pub struct Handle(PRINTER_HANDLE);

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn check(ok: i32) -> io::Result<()> {
        if ok == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Read a NUL-terminated UTF-16 string.
    ///
    /// # Safety
    /// `p` must be null or point to a NUL-terminated UTF-16 buffer.
    unsafe fn from_wide(p: *const u16) -> String {
        if p.is_null() {
            return String::new();
        }
        let mut len = 0;
        // SAFETY: caller guarantees a terminator exists.
        unsafe {
            while *p.add(len) != 0 {
                len += 1;
            }
            String::from_utf16_lossy(std::slice::from_raw_parts(p, len))
        }
    }

    impl SpoolerApi for WindowsSpooler {
        type Handle = Handle;

        fn open(&self, printer: &str) -> io::Result<Handle> {
            let name = wide(printer);
            let mut handle: PRINTER_HANDLE = unsafe { std::mem::zeroed() };
            // SAFETY: `name` is NUL-terminated and outlives the call.
            check(unsafe { OpenPrinterW(name.as_ptr(), &mut handle, ptr::null()) })?;
            Ok(Handle(handle))
        }

        fn start_doc(&self, handle: &Handle, doc_name: &str, datatype: &str) -> io::Result<u32> {
            let mut doc = wide(doc_name);
            let mut kind = wide(datatype);
            let info = DOC_INFO_1W {
                pDocName: doc.as_mut_ptr(),
                pOutputFile: ptr::null_mut(),
                pDatatype: kind.as_mut_ptr(),
            };
            // SAFETY: the strings in `info` live until the call returns.
            let job = unsafe { StartDocPrinterW(handle.0, 1, &info) };
            if job == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(job)
        }

        fn start_page(&self, handle: &Handle) -> io::Result<()> {
            check(unsafe { StartPagePrinter(handle.0) })
        }

        fn write(&self, handle: &Handle, chunk: &[u8]) -> io::Result<usize> {
            let len = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
            let mut written = 0u32;
            // SAFETY: `chunk` is valid for `len` bytes.
            check(unsafe { WritePrinter(handle.0, chunk.as_ptr().cast(), len, &mut written) })?;
            Ok(written as usize)
        }

        fn end_page(&self, handle: &Handle) -> io::Result<()> {
            check(unsafe { EndPagePrinter(handle.0) })
        }

        fn end_doc(&self, handle: &Handle) -> io::Result<()> {
            check(unsafe { EndDocPrinter(handle.0) })
        }

        fn close(&self, handle: Handle) {
            unsafe {
                ClosePrinter(handle.0);
            }
        }

        fn enumerate(&self) -> io::Result<Vec<String>> {
            let flags = PRINTER_ENUM_LOCAL | PRINTER_ENUM_CONNECTIONS;
            let mut needed = 0u32;
            let mut returned = 0u32;
            // First call only sizes the buffer; it fails with
            // ERROR_INSUFFICIENT_BUFFER by contract.
            unsafe {
                EnumPrintersW(flags, ptr::null(), 4, ptr::null_mut(), 0, &mut needed, &mut returned);
            }
            if needed == 0 {
                return Ok(Vec::new());
            }

            // u64 backing keeps the PRINTER_INFO_4W array aligned.
            let mut buf = vec![0u64; (needed as usize).div_ceil(8)];
            // SAFETY: `buf` holds at least `needed` bytes.
            check(unsafe {
                EnumPrintersW(
                    flags,
                    ptr::null(),
                    4,
                    buf.as_mut_ptr().cast(),
                    needed,
                    &mut needed,
                    &mut returned,
                )
            })?;

            let infos = buf.as_ptr().cast::<PRINTER_INFO_4W>();
            let mut names = Vec::with_capacity(returned as usize);
            for i in 0..returned as usize {
                // SAFETY: the spooler wrote `returned` entries into `buf`.
                let name = unsafe { from_wide((*infos.add(i)).pPrinterName) };
                names.push(name);
            }
            Ok(names)
        }
    }
}
