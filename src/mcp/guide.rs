//! Static `sari_guide` content: a fixed usage guide nudging
//! callers toward search-first discipline instead of opening whole files.

pub const GUIDE_TEXT: &str = "\
Codewatch Agentic Workflow Guide

[Core principles]
- search-first: call search/search_symbols before read_file.
- minimal context: read only the line range you need; read_file is a last resort.
- fallback on failure: if search_symbols misses, fall back to search.

[Recommended order]
1) status                       check daemon/engine health
2) repo_candidates -> list_files scope the workspace
3) search / search_symbols / search_api_endpoints locate candidates
4) read_symbol / read_file       fetch the minimum code you need
5) get_callers / get_implementations / call_graph assess impact
6) save_snippet / archive_context persist what you found
7) get_snippet / get_context / doctor recall and verify

[Tool list]
1. sari_guide: this guide. Call it first when unsure.
2. status: index/engine/workspace health.
3. repo_candidates: repos relevant to a query.
4. list_files: enumerate a repo's indexed files.
5. search: keyword/pattern search across indexed bodies.
6. search_symbols: search by symbol name (function/class/etc).
7. search_api_endpoints: search by HTTP route.
8. read_symbol: fetch one symbol's declaration and body.
9. read_file: fetch a whole file's stored content (last resort).
10. get_callers: who calls a given symbol.
11. get_implementations: extends/implements relations for a symbol.
12. call_graph: bounded call graph from a symbol.
13. index_file: force a re-index of one file.
14. save_snippet: save a tagged code range.
15. get_snippet: list saved snippets for a tag.
16. archive_context: save a tagged context note (same storage as snippets).
17. get_context: list saved context notes for a tag.
18. doctor: diagnostics (queue depths, engine readiness, dead-letter queue).

[Internal recovery tools (not advertised by default)]
- rescan: trigger a full re-scan of one or every root.
- scan_once: run a synchronous one-shot scan then return.

[Cautions]
- Do not call read_file twice in a row without a fresh search between calls.
- On an index/engine mismatch, run doctor, then index_file on the affected path.
- search_symbols requires `query`; narrow with `repo`/`kinds`/`path_prefix` when ambiguous.\
";
