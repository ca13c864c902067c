//! Operating system and architecture codes reported in the probe reply

/// Label used for any code this controller does not recognise
pub const UNKNOWN_PLATFORM: &str = "unknown";

const OS_NAMES: &[&str] = &[
    "Invalid",
    "Linux",
    "AIX",
    "FreeBSD",
    "HP-UX",
    "OSX",
    "NetBSD",
    "OpenBSD",
    "Solaris",
    "Windows",
    "Android",
    "DragonFly",
];

const ARCH_NAMES: &[&str] = &[
    "Invalid",
    "x86-64",
    "x86",
    "ppc",
    "ia64",
    "s390",
    "alpha",
    "sparc",
    "sparc64",
    "arm",
    "sh",
    "hppa",
    "mips",
    "aarch64",
    "generic",
];

fn lookup(table: &[&'static str], code: u8) -> &'static str {
    match code {
        0 => UNKNOWN_PLATFORM,
        _ => table.get(code as usize).copied().unwrap_or(UNKNOWN_PLATFORM),
    }
}

/// Name of an operating system code; never fails
pub fn os_name(code: u8) -> &'static str {
    lookup(OS_NAMES, code)
}

/// Name of an architecture code; never fails
pub fn arch_name(code: u8) -> &'static str {
    lookup(ARCH_NAMES, code)
}
