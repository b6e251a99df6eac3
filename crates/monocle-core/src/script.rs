//! Device-side scripts sent through the raw REPL
//!
//! Every file operation is a small MicroPython program. Paths and payloads
//! are embedded as escaped string literals; file contents travel as base64 so
//! arbitrary bytes, quotes and newlines survive the trip.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

// ----------------------------------------------------------------------------
// Literals
// ----------------------------------------------------------------------------

/// Render `value` as a single-quoted Python string literal
pub fn py_str(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('\'');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '\'' => literal.push_str("\\'"),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7F => {
                literal.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => literal.push(c),
        }
    }
    literal.push('\'');
    literal
}

// ----------------------------------------------------------------------------
// Directory Scripts
// ----------------------------------------------------------------------------

/// Defines `md(path)`: create every ancestor of `path`, ignoring existing ones
pub const MKDIR_HELPER: &str = "import os
def md(p):
    c=''
    for d in p.split('/'):
        if d:
            c+='/'+d
            try:
                os.mkdir(c)
            except:
                pass
";

/// Create `path` and its ancestors
pub fn make_dir(path: &str) -> String {
    format!("{}md({})\ndel(md,os)", MKDIR_HELPER, py_str(path))
}

/// Define the mkdir helper and create `path`, keeping the helper for
/// further calls in the same batch
pub fn make_dir_keep_helper(path: &str) -> String {
    format!("{}md({})", MKDIR_HELPER, py_str(path))
}

/// Call an already defined helper
pub fn call_make_dir(path: &str) -> String {
    format!("md({})", py_str(path))
}

/// Forget the helper names defined by a batch
pub const FORGET_HELPERS: &str = "del(md,os)";

/// Print one level of `path` as a JSON list of `{name, file}` records
pub fn list_dir(path: &str) -> String {
    format!(
        "import os,ujson
d={}
l=[]
if os.stat(d)[0] & 0x4000:
    for f in os.ilistdir(d):
        if f[0] not in ('.', '..'):
            l.append({{'name':f[0],'file':not f[1] & 0x4000}})
print(ujson.dumps(l))
del(os,ujson,l,d)",
        py_str(path)
    )
}

/// Remove `path` recursively. Entries that vanish mid-walk (ENOENT) are
/// skipped; any other failure prints a line containing `failed`.
pub fn delete(path: &str) -> String {
    format!(
        "import os
def rm(d):
    try:
        if os.stat(d)[0] & 0x4000:
            for f in os.ilistdir(d):
                if f[0] not in ('.', '..'):
                    rm('/'.join((d, f[0])))
            os.rmdir(d)
        else:
            os.remove(d)
    except OSError as e:
        if e.args[0] != 2:
            print(\"rm of '%s' failed\" % d, e)
    except Exception as e:
        print(\"rm of '%s' failed\" % d, e)
rm({})
del(os,rm)",
        py_str(path)
    )
}

/// Rename or move a file or directory
pub fn rename(old_path: &str, new_path: &str) -> String {
    format!(
        "import os\nos.rename({},{})\ndel(os)",
        py_str(old_path),
        py_str(new_path)
    )
}

// ----------------------------------------------------------------------------
// File Scripts
// ----------------------------------------------------------------------------

/// Create or truncate `path` as an empty file
pub fn write_empty(path: &str) -> String {
    format!("f=open({},'w');f.write('');f.close();del(f)", py_str(path))
}

/// Open `path` for a chunked binary write
pub fn open_for_write(path: &str) -> String {
    format!("import ubinascii\nf=open({},'wb')", py_str(path))
}

/// Append one chunk to the file opened by [`open_for_write`]
pub fn write_chunk(chunk: &[u8]) -> String {
    format!("f.write(ubinascii.a2b_base64('{}'))", BASE64.encode(chunk))
}

/// Close the file opened by [`open_for_write`]
pub const CLOSE_WRITE: &str = "f.close()\ndel(f,ubinascii)";

/// Split file content into write commands of `chunk_size` raw bytes
pub fn write_chunks(content: &[u8], chunk_size: usize) -> Vec<String> {
    content.chunks(chunk_size.max(1)).map(write_chunk).collect()
}

/// Print the content of `path` as one base64 line
pub fn read_file(path: &str) -> String {
    format!(
        "import ubinascii\nf=open({},'rb')\nprint(ubinascii.b2a_base64(f.read()).decode().strip())\nf.close()\ndel(f,ubinascii)",
        py_str(path)
    )
}

/// Decode the payload printed by [`read_file`]
pub fn decode_read_payload(payload: &str) -> Option<Vec<u8>> {
    BASE64.decode(payload.trim()).ok()
}

// ----------------------------------------------------------------------------
// Device Paths
// ----------------------------------------------------------------------------

/// Join a device directory and a relative path with `/`
pub fn join_device_path(root: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches('/');
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        return if root.is_empty() { "/".to_string() } else { root.to_string() };
    }
    format!("{}/{}", root, relative)
}

/// Directory part of a device path, `None` for entries at the top level
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let index = trimmed.rfind('/')?;
    let parent = &trimmed[..index];
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}
