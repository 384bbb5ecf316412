use cbsgen_schema::{ends_with_ignore_case, ComponentIdentity, ARCH_ARM64_ON_ARM, ARCH_ARM64_ON_X86};
use serde::{Deserialize, Serialize};

pub const SERVICING_PACKAGES_DIR: &str = r"Windows\servicing\Packages";
pub const SXS_MANIFESTS_DIR: &str = r"Windows\WinSxS\Manifests";

const MANIFEST_EXTENSION: &str = ".manifest";
const PACKAGE_MANIFEST: &str = "update.mum";
const PACKAGE_CATALOG: &str = "update.cat";

type MacroTable = [(&'static str, &'static str); 11];

const NATIVE_MACROS: MacroTable = [
    ("$(runtime.bootdrive)", ""),
    ("$(runtime.systemroot)", "windows"),
    ("$(runtime.fonts)", r"windows\fonts"),
    ("$(runtime.inf)", r"windows\inf"),
    ("$(runtime.system)", r"windows\system"),
    ("$(runtime.system32)", r"windows\system32"),
    ("$(runtime.wbem)", r"windows\system32\wbem"),
    ("$(runtime.drivers)", r"windows\system32\drivers"),
    ("$(runtime.programfiles)", "Program Files"),
    ("$(runtime.programdata)", "ProgramData"),
    ("$(runtime.startmenu)", r"ProgramData\Microsoft\Windows\Start Menu"),
];

const ARM_ON_ARM64_MACROS: MacroTable = [
    ("$(runtime.bootdrive)", ""),
    ("$(runtime.systemroot)", "windows"),
    ("$(runtime.fonts)", r"windows\fonts"),
    ("$(runtime.inf)", r"windows\inf"),
    ("$(runtime.system)", r"windows\system"),
    ("$(runtime.system32)", r"windows\sysarm32"),
    ("$(runtime.wbem)", r"windows\sysarm32\wbem"),
    ("$(runtime.drivers)", r"windows\sysarm32\drivers"),
    ("$(runtime.programfiles)", "Program Files (Arm)"),
    ("$(runtime.programdata)", "ProgramData"),
    ("$(runtime.startmenu)", r"ProgramData\Microsoft\Windows\Start Menu"),
];

const X86_ON_ARM64_MACROS: MacroTable = [
    ("$(runtime.bootdrive)", ""),
    ("$(runtime.systemroot)", "windows"),
    ("$(runtime.fonts)", r"windows\fonts"),
    ("$(runtime.inf)", r"windows\inf"),
    ("$(runtime.system)", r"windows\system"),
    ("$(runtime.system32)", r"windows\syswow64"),
    ("$(runtime.wbem)", r"windows\syswow64\wbem"),
    ("$(runtime.drivers)", r"windows\syswow64\drivers"),
    ("$(runtime.programfiles)", "Program Files (x86)"),
    ("$(runtime.programdata)", "ProgramData"),
    ("$(runtime.startmenu)", r"ProgramData\Microsoft\Windows\Start Menu"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverOptions {
    /// Side-by-side manifests on the image are delta-compressed; when set,
    /// bare manifests must be expanded before packing.
    pub use_uncompressed_manifests: bool,
}

/// A symbolic manifest path turned into a partition-relative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub relative: String,
    /// The entry was a bare `*.manifest` name flattened under the SxS store.
    pub is_manifest: bool,
    pub decode_manifest: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MacroResolver {
    options: ResolverOptions,
}

impl MacroResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ResolverOptions {
        self.options
    }

    /// Resolve `symbolic` for a package with the given identity. Pure: the
    /// result depends only on the path, the identity, and the options.
    pub fn resolve(&self, symbolic: &str, identity: &ComponentIdentity) -> ResolvedPath {
        let mut path = symbolic.to_lowercase();
        strip_leading_separator(&mut path);

        let is_manifest = !path.contains('\\') && path.ends_with(MANIFEST_EXTENSION);
        if is_manifest {
            path = format!("{SXS_MANIFESTS_DIR}\\{path}");
        }

        let mut path = expand_macros(&path, macro_table(identity));
        strip_leading_separator(&mut path);

        let canonical = identity.canonical_name();
        for (generic, extension) in [(PACKAGE_MANIFEST, "mum"), (PACKAGE_CATALOG, "cat")] {
            if path.ends_with(generic) {
                path.truncate(path.len() - generic.len());
                path.push_str(&format!("{canonical}.{extension}"));
                if !path.contains('\\') {
                    path = format!("{SERVICING_PACKAGES_DIR}\\{path}");
                }
            }
        }

        ResolvedPath {
            relative: path,
            is_manifest,
            decode_manifest: is_manifest && self.options.use_uncompressed_manifests,
        }
    }
}

fn macro_table(identity: &ComponentIdentity) -> &'static MacroTable {
    if identity.is_architecture(ARCH_ARM64_ON_ARM) {
        &ARM_ON_ARM64_MACROS
    } else if identity.is_architecture(ARCH_ARM64_ON_X86) {
        &X86_ON_ARM64_MACROS
    } else {
        &NATIVE_MACROS
    }
}

fn expand_macros(path: &str, table: &MacroTable) -> String {
    table
        .iter()
        .fold(path.to_owned(), |acc, (token, value)| acc.replace(token, value))
}

fn strip_leading_separator(path: &mut String) {
    if path.starts_with('\\') {
        path.remove(0);
    }
}

pub fn is_manifest_path(path: &str) -> bool {
    ends_with_ignore_case(path, MANIFEST_EXTENSION)
}
