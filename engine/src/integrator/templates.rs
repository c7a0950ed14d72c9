//! Static scaffold files written around the generated sources

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const BASE_REQUIREMENTS: &[&str] = &[
    "fastapi>=0.100.0",
    "uvicorn>=0.23.0",
    "sqlalchemy>=2.0.0",
    "pydantic>=2.0.0",
    "python-dotenv>=1.0.0",
];

/// Imported module name to pinned requirement
const OPTIONAL_REQUIREMENTS: &[(&str, &str)] = &[
    ("pandas", "pandas>=2.0.0"),
    ("numpy", "numpy>=1.24.0"),
    ("sklearn", "scikit-learn>=1.3.0"),
    ("matplotlib", "matplotlib>=3.7.0"),
    ("requests", "requests>=2.31.0"),
    ("httpx", "httpx>=0.25.0"),
    ("jose", "python-jose[cryptography]>=3.3.0"),
];

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:from|import)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("Invalid import pattern")
    })
}

/// Top-level modules imported by a Python source
pub fn imported_modules(source: &str) -> Vec<&str> {
    import_pattern()
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// `requirements.txt`: the base set plus libraries the backend imports
pub fn requirements_txt(backend_source: &str) -> String {
    let imported = imported_modules(backend_source);
    let mut lines: Vec<&str> = BASE_REQUIREMENTS.to_vec();
    for (module, requirement) in OPTIONAL_REQUIREMENTS {
        if imported.contains(module) {
            lines.push(*requirement);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn index_html() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Generated Application</title>
    <script src="https://unpkg.com/react@18/umd/react.development.js"></script>
    <script src="https://unpkg.com/react-dom@18/umd/react-dom.development.js"></script>
    <script src="https://unpkg.com/@babel/standalone/babel.min.js"></script>
    <script src="https://cdn.tailwindcss.com"></script>
    <script src="https://unpkg.com/axios/dist/axios.min.js"></script>
    <script src="runtime-config.js"></script>
    <script src="config.js"></script>
</head>
<body class="bg-gray-100 min-h-screen">
    <div id="root" class="container mx-auto p-4"></div>
    <script type="text/babel" data-presets="react" src="App.jsx"></script>
</body>
</html>
"#
    .to_string()
}

/// `config.js`; the deployer may set `window.API_BASE_URL` first
pub fn config_js() -> String {
    r#"// API endpoint configuration
window.API_BASE_URL = window.API_BASE_URL || 'http://localhost:8001';

window.apiCall = async (endpoint, method = 'GET', data = null) => {
  const options = {
    method,
    headers: { 'Content-Type': 'application/json' },
  };
  if (data) {
    options.body = JSON.stringify(data);
  }

  const response = await fetch(`${window.API_BASE_URL}${endpoint}`, options);
  if (!response.ok) {
    throw new Error(`API call failed: ${response.statusText}`);
  }
  return response.json();
};
"#
    .to_string()
}

/// Script the deployer writes next to `config.js` once ports are known
pub fn runtime_config_js(backend_url: &str) -> String {
    format!("window.API_BASE_URL = '{}';\n", backend_url)
}

pub fn package_json(bundle_id: &str) -> String {
    let package = serde_json::json!({
        "name": bundle_id.replace('_', "-"),
        "version": "0.1.0",
        "private": true,
        "dependencies": {
            "react": "^18.2.0",
            "react-dom": "^18.2.0",
            "tailwindcss": "^3.3.0",
            "axios": "^1.6.0"
        },
        "scripts": {
            "start": "react-scripts start",
            "build": "react-scripts build"
        }
    });
    let mut out = serde_json::to_string_pretty(&package).unwrap_or_default();
    out.push('\n');
    out
}

pub fn readme(bundle_id: &str, root: &Path) -> String {
    let root = root.display();
    format!(
        r#"# {bundle_id}

Generated by launchpad.

## Structure
- `backend/`: FastAPI service (`app.py`)
- `frontend/`: React single-page UI (`App.jsx`, `index.html`)
- `bundle.json`: file manifest with SHA-256 digests

## Running

Deploy with launchpad:

```
launchpad deploy {root}
```

Or run by hand.

### Backend
```
cd {root}/backend
pip install -r requirements.txt
uvicorn app:app --host 127.0.0.1 --port 8001
```

### Frontend
```
cd {root}/frontend
python -m http.server 3000
```

- Backend API: http://localhost:8001 (`GET /health` returns 200 when ready)
- Frontend UI: http://localhost:3000
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_include_imported_libraries_only() {
        let source = "import pandas as pd\nfrom sklearn.linear_model import LinearRegression\n\
                      # uses requests for nothing\nfrom fastapi import FastAPI\n";
        let txt = requirements_txt(source);

        assert!(txt.starts_with("fastapi>=0.100.0\n"));
        assert!(txt.contains("pandas>=2.0.0"));
        assert!(txt.contains("scikit-learn>=1.3.0"));
        assert!(!txt.contains("requests"));
        assert!(!txt.contains("numpy"));
    }

    #[test]
    fn test_jose_maps_to_python_jose() {
        let txt = requirements_txt("from jose import jwt\n");
        assert!(txt.contains("python-jose[cryptography]"));
    }

    #[test]
    fn test_package_json_is_valid() {
        let value: serde_json::Value =
            serde_json::from_str(&package_json("generated_project_abcd1234")).unwrap();
        assert_eq!(value["name"], "generated-project-abcd1234");
        assert_eq!(value["dependencies"]["react"], "^18.2.0");
    }
}
