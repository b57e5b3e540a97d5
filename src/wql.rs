//! WQL query builder for [`run_wql`](crate::session::WinRmSession::run_wql).

/// Builder for WQL SELECT statements.
#[derive(Debug, Clone)]
pub struct WqlBuilder {
    select_fields: Vec<String>,
    class: String,
    conditions: Vec<String>,
}

impl WqlBuilder {
    /// Start building a query against a CIM class.
    pub fn select(class: &str) -> Self {
        Self {
            select_fields: Vec::new(),
            class: class.to_string(),
            conditions: Vec::new(),
        }
    }

    /// Fields to return (`*` when none are named).
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.select_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Raw WHERE condition, combined with AND.
    pub fn where_raw(mut self, condition: &str) -> Self {
        self.conditions.push(condition.to_string());
        self
    }

    /// `Property = 'value'`
    pub fn where_eq(mut self, property: &str, value: &str) -> Self {
        self.conditions
            .push(format!("{} = '{}'", property, wql_escape(value)));
        self
    }

    /// `Property != 'value'`
    pub fn where_ne(mut self, property: &str, value: &str) -> Self {
        self.conditions
            .push(format!("{} != '{}'", property, wql_escape(value)));
        self
    }

    /// `Property = value` for numeric comparisons.
    pub fn where_eq_num(mut self, property: &str, value: i64) -> Self {
        self.conditions.push(format!("{} = {}", property, value));
        self
    }

    /// `Property LIKE 'pattern'`
    pub fn where_like(mut self, property: &str, pattern: &str) -> Self {
        self.conditions
            .push(format!("{} LIKE '{}'", property, wql_escape(pattern)));
        self
    }

    /// Render the WQL SELECT statement.
    pub fn build(&self) -> String {
        let fields = if self.select_fields.is_empty() {
            "*".to_string()
        } else {
            self.select_fields.join(", ")
        };

        let mut query = format!("SELECT {} FROM {}", fields, self.class);
        if !self.conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&self.conditions.join(" AND "));
        }
        query
    }
}

/// Escape backslashes and single quotes in WQL string literals.
fn wql_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all() {
        assert_eq!(
            WqlBuilder::select("Win32_Service").build(),
            "SELECT * FROM Win32_Service"
        );
    }

    #[test]
    fn select_with_fields_and_filter() {
        let q = WqlBuilder::select("Win32_Service")
            .fields(&["Name", "State"])
            .where_eq("Name", "Spooler")
            .build();
        assert_eq!(
            q,
            "SELECT Name, State FROM Win32_Service WHERE Name = 'Spooler'"
        );
    }

    #[test]
    fn conditions_combine_with_and() {
        let q = WqlBuilder::select("Win32_Process")
            .where_like("Name", "%powershell%")
            .where_eq_num("SessionId", 1)
            .build();
        assert_eq!(
            q,
            "SELECT * FROM Win32_Process WHERE Name LIKE '%powershell%' AND SessionId = 1"
        );
    }

    #[test]
    fn string_values_are_escaped() {
        let q = WqlBuilder::select("Win32_Service")
            .where_eq("PathName", r"C:\Windows\System32\spoolsv.exe")
            .build();
        assert!(q.contains(r"C:\\Windows\\System32\\spoolsv.exe"));

        let q = WqlBuilder::select("Win32_Service")
            .where_eq("DisplayName", "Print 'Spooler'")
            .build();
        assert!(q.contains(r"Print \'Spooler\'"));
    }
}
