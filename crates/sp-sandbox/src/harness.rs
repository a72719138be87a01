// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-language guest harnesses.
//!
//! Each harness reads the inputs JSON from stdin, calls the skill's
//! `execute` entry point, and writes exactly one result envelope as the last
//! line of stdout. User `print`/`console.log` output is redirected to stderr
//! where the runtime allows it; the host parses the last stdout line either
//! way.

use sp_core::Language;

/// File name the skill blob is staged under.
pub(crate) fn skill_file(language: Language) -> &'static str {
    match language {
        Language::Python => "skill.py",
        Language::Typescript => "skill.ts",
        Language::Go => "skill.go",
    }
}

/// File name the harness is staged under.
pub(crate) fn harness_file(language: Language) -> &'static str {
    match language {
        Language::Python => "main.py",
        Language::Typescript => "main.ts",
        Language::Go => "main.go",
    }
}

/// Harness source for the given language.
pub(crate) fn harness_source(language: Language) -> &'static str {
    match language {
        Language::Python => PYTHON_HARNESS,
        Language::Typescript => TYPESCRIPT_HARNESS,
        Language::Go => GO_HARNESS,
    }
}

const PYTHON_HARNESS: &str = r#"import json
import os
import sys
import traceback

_limit = os.environ.get("SKILLPORT_MAX_MEMORY_BYTES")
if _limit:
    try:
        import resource
        resource.setrlimit(resource.RLIMIT_AS, (int(_limit), int(_limit)))
    except (ImportError, ValueError, OSError):
        pass


def _emit(out, payload):
    out.write(json.dumps(payload) + "\n")
    out.flush()


def _main():
    raw = sys.stdin.read()
    inputs = json.loads(raw) if raw.strip() else {}
    if inputs is None:
        inputs = {}

    out = sys.stdout
    sys.stdout = sys.stderr

    try:
        import skill
        result = skill.execute(inputs)
    except BaseException:
        _emit(out, {"err": "execution_failed", "detail": traceback.format_exc()})
        return

    try:
        line = json.dumps({"ok": result})
    except (TypeError, ValueError) as exc:
        _emit(out, {"err": "marshalling_failed", "detail": str(exc)})
        return

    out.write(line + "\n")
    out.flush()


_main()
"#;

const TYPESCRIPT_HARNESS: &str = r#"import { execute } from "./skill.ts";

function emit(payload: unknown): void {
  const line = JSON.stringify(payload) + "\n";
  Deno.stdout.writeSync(new TextEncoder().encode(line));
}

const raw = await new Response(Deno.stdin.readable).text();
let inputs: unknown = raw.trim() ? JSON.parse(raw) : {};
if (inputs === null) {
  inputs = {};
}

// Route user logging away from the result channel.
console.log = console.error;

let result: unknown;
try {
  result = await execute(inputs);
} catch (err) {
  const detail = err instanceof Error ? (err.stack ?? err.message) : String(err);
  emit({ err: "execution_failed", detail });
  Deno.exit(0);
}

let line: string | undefined;
try {
  line = JSON.stringify({ ok: result === undefined ? null : result });
} catch (err) {
  emit({ err: "marshalling_failed", detail: String(err) });
  Deno.exit(0);
}

Deno.stdout.writeSync(new TextEncoder().encode(line + "\n"));
"#;

const GO_HARNESS: &str = r#"package main

import (
	"bytes"
	"encoding/json"
	"fmt"
	"io"
	"os"
)

func emit(payload map[string]any) {
	line, _ := json.Marshal(payload)
	fmt.Println(string(line))
}

func main() {
	data, err := io.ReadAll(os.Stdin)
	if err != nil {
		emit(map[string]any{"err": "execution_failed", "detail": err.Error()})
		return
	}

	inputs := map[string]any{}
	trimmed := bytes.TrimSpace(data)
	if len(trimmed) > 0 && !bytes.Equal(trimmed, []byte("null")) {
		if err := json.Unmarshal(trimmed, &inputs); err != nil {
			emit(map[string]any{"err": "execution_failed", "detail": err.Error()})
			return
		}
	}

	result, err := Execute(inputs)
	if err != nil {
		emit(map[string]any{"err": "execution_failed", "detail": err.Error()})
		return
	}

	line, jerr := json.Marshal(map[string]any{"ok": result})
	if jerr != nil {
		emit(map[string]any{"err": "marshalling_failed", "detail": jerr.Error()})
		return
	}
	fmt.Println(string(line))
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_has_a_staging_layout() {
        for lang in Language::all() {
            assert!(!skill_file(*lang).is_empty());
            assert!(!harness_file(*lang).is_empty());
            assert!(!harness_source(*lang).is_empty());
        }
    }

    #[test]
    fn harnesses_emit_the_envelope_keys() {
        for lang in Language::all() {
            let src = harness_source(*lang);
            assert!(src.contains("execution_failed"), "{lang}");
            assert!(src.contains("marshalling_failed"), "{lang}");
            assert!(src.contains("\"ok\"") || src.contains("{ ok:") || src.contains("{\"ok\""), "{lang}");
        }
    }
}
