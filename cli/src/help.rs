pub const ANALYZE_LONG_HELP: &str = r#"Extract and analyze the VBA macros in a file

<FILE> can be a legacy Office document stored as an OLE compound file (.doc,
.xls, .ppt) or an OOXML package (.docm, .xlsm, .pptm).

The source code of every module is saved in a directory named after the SHA-256
of the file, inside <OUTPUT_DIR>. Standard modules are saved as .bas files, class
and document modules as .cls files. If the directory already exists, its content
is removed first.

Examples:

vbascan analyze invoice.doc
vbascan analyze --output-dir /tmp/macros invoice.xlsm
vbascan analyze --no-extract --output-format=json invoice.docm"#;

pub const CONFIG_FILE: &str = r#"Config file for vbascan

Specifies a config file which controls the behavior of vbascan. If config file is
not specified, ${HOME}/.vbascan.toml is used. If it does not exist the default
options are applied.

Example:

[analysis]
max_module_size = 1048576

[analysis.thresholds]
min_base64_length = 24

[[patterns]]
category = "suspicious"
pattern = { keyword = "URLDownloadToFileA" }
description = "May download files from the Internet"

[[families]]
family = "Emotet"
scheme = { literal = "]anw[" }
description = "String separator used by Emotet""#;

pub const MAX_MODULE_SIZE_LONG_HELP: &str = r#"Maximum size of the decompressed source of a module

Modules whose source code is larger than <BYTES> are reported as failed and are not
analyzed. The default value is 16 MiB."#;

pub const OUTPUT_DIR_LONG_HELP: &str = r#"Directory where the extracted macros are saved

A subdirectory named after the SHA-256 of the analyzed file is created inside
<OUTPUT_DIR>. By default it is created in the current directory."#;

pub const OUTPUT_FORMAT_LONG_HELP: &str = r#"Output format

The format in which results will be displayed. Any errors will not be in this
format, only results.

Examples:

--output-format=json"#;

pub const PATTERNS_FILE_LONG_HELP: &str = r#"Load additional patterns from a file

The file uses the same TOML syntax as the [[patterns]] and [[families]] arrays of
the config file, and can also have a [thresholds] table. Patterns are added to the
built-in ones and to the ones in the config file."#;

pub const PATTERNS_LONG_HELP: &str = r#"List the patterns used by the analysis

Lists the built-in patterns, plus the ones defined in the config file. The
--category option shows only the patterns in a given category.

Examples:

vbascan patterns
vbascan patterns --category=auto-exec"#;
