//! Generation of the per-build NixOS overlay module.

use std::{
    fs,
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::error::IoContext;
use crate::kernel::{DecodedPatch, KernelConfig};
use crate::layout::{BUILD_OVERRIDES_PATH, KERNEL_PATCHES_PATH, compile_regex};
use crate::prelude::*;
use crate::profile_config::normalize_packages;

const OVERRIDES_MODE: u32 = 0o640;

static NIX_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Za-z_][A-Za-z0-9_']*$"));
static PACKAGE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^[A-Za-z0-9_+'-]+$"));

/// Inputs of the overlay module for one build.
#[derive(Debug, Clone, Copy)]
pub struct BuildOverrides<'a> {
    pub version: &'a str,
    pub fleet_id: &'a str,
    /// Origin devices fetch updates from, without a trailing slash.
    pub update_base_url: &'a str,
    pub packages: &'a [String],
    pub kernel: &'a KernelConfig,
    /// Kernel attributes builds may select. Empty allows any.
    pub allowed_kernels: &'a [String],
}

/// A rendered overlay and the patch files it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOverrides {
    pub module: String,
    pub patches: Vec<DecodedPatch>,
}

/// Escapes a value for use inside a double-quoted Nix string.
pub fn escape_nix_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '$' => escaped.push_str("\\$"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Translates a dotted package attribute name into a Nix expression.
///
/// Segments that are plain identifiers stay bare. Any other segment is quoted,
/// which forces the whole expression to be rooted at `pkgs.`.
pub fn package_expression(package: &str) -> Result<String> {
    let invalid = |reason| Error::InvalidPackage {
        package: package.to_string(),
        reason,
    };

    let trimmed = package.trim();
    if trimmed.is_empty() {
        return Err(invalid("package name is empty"));
    }

    let segments: Vec<&str> = trimmed.split('.').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid("package name contains empty segment"));
        }
        if !PACKAGE_SEGMENT.is_match(segment) {
            return Err(invalid("package name contains unsupported characters"));
        }
    }

    let mut quoted = false;
    let parts: Vec<String> = segments
        .iter()
        .map(|segment| {
            if NIX_IDENTIFIER.is_match(segment) {
                segment.to_string()
            } else {
                quoted = true;
                format!("\"{}\"", escape_nix_string(segment))
            }
        })
        .collect();

    let expression = parts.join(".");
    Ok(if quoted {
        format!("pkgs.{expression}")
    } else {
        expression
    })
}

fn kernel_block(kernel: &KernelConfig, patches: &[DecodedPatch]) -> String {
    let kernel = kernel.normalized();
    if kernel.attr.is_empty() {
        return String::new();
    }

    let source = &kernel.source_override;
    if !source.enabled {
        return format!(
            "boot.kernelPackages = lib.mkForce (pkgs.linuxPackagesFor pkgs.linuxKernel.kernels.{});",
            kernel.attr
        );
    }

    let ref_line = if source.git_ref.is_empty() {
        String::new()
    } else {
        format!(
            "          ref = \"{}\";\n",
            escape_nix_string(&source.git_ref)
        )
    };

    let patches_line = if patches.is_empty() {
        String::new()
    } else {
        let entries: Vec<String> = patches
            .iter()
            .map(|patch| {
                let name = escape_nix_string(&patch.name);
                format!(
                    "            {{ name = \"{name}\"; patch = ./. + \"/kernel-patches/{name}\"; }}"
                )
            })
            .collect();
        format!(
            "        kernelPatches = baseKernel.kernelPatches ++ [\n{}\n        ];\n",
            entries.join("\n")
        )
    };

    format!(
        r#"nixpkgs.overlays = [
    (final: prev: {{
      fleetKernel = let
        baseKernel = prev.linuxKernel.kernels.{attr};
        sourceOverride = builtins.fetchGit {{
          url = "{url}";
          rev = "{rev}";
{ref_line}        }};
      in
      baseKernel.override {{
        argsOverride = {{
          src = sourceOverride;
          version = baseKernel.version;
          modDirVersion = baseKernel.version;
        }};
{patches_line}      }};

      fleetKernelPackages = final.linuxPackagesFor final.fleetKernel;
    }})
  ];

  boot.kernelPackages = lib.mkForce pkgs.fleetKernelPackages;"#,
        attr = kernel.attr,
        url = escape_nix_string(&source.url),
        rev = escape_nix_string(&source.rev),
    )
}

impl BuildOverrides<'_> {
    /// Validates the inputs and renders the overlay module.
    pub fn render(&self) -> Result<RenderedOverrides> {
        let version = self.version.trim();
        if version.is_empty() {
            return Err(Error::MissingVersion);
        }

        let expressions = normalize_packages(self.packages)
            .iter()
            .map(String::as_str)
            .map(package_expression)
            .collect::<Result<Vec<_>>>()?;

        let kernel = self.kernel.normalized();
        let patches = if kernel.attr.is_empty() {
            Vec::new()
        } else {
            self.kernel.decoded_patches(self.allowed_kernels)?
        };
        let kernel_block = kernel_block(&kernel, &patches);

        let fleet_id = self.fleet_id.trim();
        if fleet_id.is_empty() {
            return Err(Error::MissingFleet);
        }

        let source_path = escape_nix_string(&format!(
            "{}/update/{}/",
            self.update_base_url.trim_end_matches('/'),
            fleet_id
        ));
        let package_lines = if expressions.is_empty() {
            String::new()
        } else {
            format!("    {}\n", expressions.join("\n    "))
        };

        let module = format!(
            r#"{{ lib, pkgs, ... }}:
{{
  system.image.version = "{version}";

  systemd.sysupdate.transfers."10-nix-store".Source.Path = lib.mkForce "{source_path}";
  systemd.sysupdate.transfers."20-boot-image".Source.Path = lib.mkForce "{source_path}";

  {kernel_block}

  environment.systemPackages = with pkgs; [
{package_lines}  ];
}}
"#,
            version = escape_nix_string(version),
        );

        Ok(RenderedOverrides { module, patches })
    }

    /// Writes the overlay into the source tree, replacing any previous one.
    pub fn write(&self, source_dir: &Path) -> Result<()> {
        let rendered = self.render()?;

        let patches_dir = source_dir.join(KERNEL_PATCHES_PATH);
        if patches_dir.exists() {
            fs::remove_dir_all(&patches_dir)
                .context(|| String::from("failed to reset kernel patch directory"))?;
        }
        if !rendered.patches.is_empty() {
            fs::create_dir_all(&patches_dir)
                .context(|| String::from("failed to create kernel patch directory"))?;
            for patch in &rendered.patches {
                fs::write(patches_dir.join(&patch.name), &patch.content)
                    .context(|| format!("failed to write kernel patch {}", patch.name))?;
            }
        }

        let path = source_dir.join(BUILD_OVERRIDES_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(|| String::from("failed to create modules directory"))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(OVERRIDES_MODE)
            .open(&path)
            .context(|| String::from("failed to write build overrides module"))?;
        file.write_all(rendered.module.as_bytes())
            .context(|| String::from("failed to write build overrides module"))?;
        Ok(())
    }
}
