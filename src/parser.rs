use crate::ast::{AttrValue, Attribute, MarkupNode, Node, NodeType, Span};
use crate::error::{ParseError, TableError, ValueError};
use crate::frontmatter::{extract_frontmatter, FormMetadata};
use crate::markup::MarkupParser;
use crate::model::*;
use crate::table::{self, Grid};
use crate::tags::{self, TagKind};
use crate::utils::line_range;
use crate::values::{self, RawValue, Sentinel};
use miette::NamedSource;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where a recognised node sits in the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeSpan {
    /// From the start of the opening tag to the end of the closing tag.
    pub span: Span,
    pub open_tag: Span,
    /// 1-based first and last line.
    pub lines: (usize, usize),
}

/// Source positions of every recognised node, used for content-preserving output.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SourceIndex {
    pub frontmatter: Option<Span>,
    pub form: NodeSpan,
    pub groups: BTreeMap<String, NodeSpan>,
    pub fields: BTreeMap<String, NodeSpan>,
    /// Parallel to `FormSchema::docs`.
    pub docs: Vec<NodeSpan>,
}

/// Everything the structural parser extracts from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub metadata: FormMetadata,
    pub schema: FormSchema,
    pub responses: ResponseStore,
    pub index: SourceIndex,
}

/// Walks the markup tree of a form document and builds the typed model.
///
///    Document ::= [ Frontmatter ] { Prose | Doc } Form { Prose | Doc }
///    Form     ::= "{% form" Attrs "%}" { Prose | Doc | Group } "{% /form %}"
///    Group    ::= "{% group" Attrs "%}" { Prose | Doc | Group | Field } "{% /group %}"
///    Field    ::= "{% field" Attrs "%}" { OptionLine | ValueFence | Grid } "{% /field %}"
///    Doc      ::= "{% description|instructions|documentation ref=Id %}" Markdown "{% /... %}"
pub struct FormParser<'a> {
    source: &'a str,
    name: String,
    metadata: FormMetadata,
    index: SourceIndex,
    /// Every declared id with its position in document order.
    ids: BTreeMap<String, usize>,
    docs: Vec<(DocumentationBlock, Span)>,
    responses: ResponseStore,
}

impl<'a> FormParser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::new_with_name(source, "form.md".to_string())
    }

    pub fn new_with_name(source: &'a str, name: String) -> Self {
        Self {
            source,
            name,
            metadata: FormMetadata::default(),
            index: SourceIndex::default(),
            ids: BTreeMap::new(),
            docs: Vec::new(),
            responses: ResponseStore::new(),
        }
    }

    pub fn parse_document(mut self) -> Result<ParsedDocument, ParseError> {
        let frontmatter = extract_frontmatter(self.source, &self.name)?;
        self.metadata = frontmatter.metadata;
        self.index.frontmatter = frontmatter.span;

        let root = MarkupParser::new(self.source, &self.name, frontmatter.body_start).parse()?;

        let mut schema = None;
        for child in root.children() {
            let NodeType::Tag(name) = child.node_type() else {
                continue;
            };
            match self.tag_kind(child, name)? {
                TagKind::Form => {
                    if schema.is_some() {
                        return Err(self.misplaced(child, name, "a document holds exactly one form"));
                    }
                    schema = Some(self.parse_form(child)?);
                }
                TagKind::Doc(kind) => self.parse_doc(child, kind)?,
                TagKind::Group | TagKind::Field(_) => {
                    return Err(self.misplaced(child, name, "it must be inside the form"));
                }
            }
        }

        let Some(mut schema) = schema else {
            return Err(ParseError::MissingForm {
                src: self.named_source(),
                span: (
                    frontmatter.body_start,
                    self.source.len() - frontmatter.body_start,
                )
                    .into(),
            });
        };

        for (doc, ref_span) in &self.docs {
            if !self.ids.contains_key(&doc.reference) {
                return Err(ParseError::UndeclaredReference {
                    src: self.named_source(),
                    span: (*ref_span).into(),
                    what: "form, group or field".to_string(),
                    name: doc.reference.clone(),
                });
            }
        }

        // Docs are kept in the order of their targets, so a regenerated document
        // (which writes each doc next to its target) parses back to the same schema.
        let mut docs: Vec<(DocumentationBlock, NodeSpan)> = self
            .docs
            .into_iter()
            .map(|(doc, _)| doc)
            .zip(self.index.docs.drain(..))
            .collect();
        docs.sort_by_key(|(doc, _)| self.ids.get(&doc.reference).copied().unwrap_or(usize::MAX));
        let (docs, spans): (Vec<_>, Vec<_>) = docs.into_iter().unzip();
        schema.docs = docs;
        self.index.docs = spans;

        log::debug!(
            "parsed form `{}`: {} fields, {} docs",
            schema.id,
            self.responses.len(),
            schema.docs.len()
        );
        Ok(ParsedDocument {
            metadata: self.metadata,
            schema,
            responses: self.responses,
            index: self.index,
        })
    }

    // === Structure ===

    fn parse_form(&mut self, node: &Node) -> Result<FormSchema, ParseError> {
        self.check_attributes(node, tags::FORM_TAG, |name| {
            tags::FORM_ATTRIBUTES.contains(&name)
        })?;
        let id = self.required_id(node, tags::FORM_TAG)?;
        let title = self.attr_string(node, "title")?;
        self.declare_id(&id, node)?;
        self.index.form = self.node_span(node);

        let mut groups = Vec::new();
        for child in node.children() {
            let NodeType::Tag(name) = child.node_type() else {
                continue;
            };
            match self.tag_kind(child, name)? {
                TagKind::Group => groups.push(self.parse_group(child)?),
                TagKind::Doc(kind) => self.parse_doc(child, kind)?,
                TagKind::Form => return Err(self.misplaced(child, name, "forms cannot be nested")),
                TagKind::Field(_) => {
                    return Err(self.misplaced(child, name, "fields must be inside a group"));
                }
            }
        }

        Ok(FormSchema {
            id,
            title,
            groups,
            docs: Vec::new(),
        })
    }

    fn parse_group(&mut self, node: &Node) -> Result<FieldGroup, ParseError> {
        self.check_attributes(node, tags::GROUP_TAG, |name| {
            tags::GROUP_ATTRIBUTES.contains(&name)
        })?;
        let id = self.required_id(node, tags::GROUP_TAG)?;
        let title = self.attr_string(node, "title")?;
        self.declare_id(&id, node)?;
        let span = self.node_span(node);
        self.index.groups.insert(id.clone(), span);

        let mut children = Vec::new();
        for child in node.children() {
            let NodeType::Tag(name) = child.node_type() else {
                continue;
            };
            match self.tag_kind(child, name)? {
                TagKind::Group => children.push(GroupItem::Group(self.parse_group(child)?)),
                TagKind::Field(alias) => {
                    children.push(GroupItem::Field(self.parse_field(child, name, alias)?));
                }
                TagKind::Doc(kind) => self.parse_doc(child, kind)?,
                TagKind::Form => return Err(self.misplaced(child, name, "forms cannot be nested")),
            }
        }

        Ok(FieldGroup {
            id,
            title,
            children,
        })
    }

    fn parse_doc(&mut self, node: &Node, kind: DocKind) -> Result<(), ParseError> {
        let tag = kind.tag_name();
        self.check_attributes(node, tag, |name| tags::DOC_ATTRIBUTES.contains(&name))?;
        let Some(reference) = self.attr_string(node, "ref")? else {
            return Err(self.missing_attribute(node, tag, "ref"));
        };
        for child in node.children() {
            if let NodeType::Tag(name) = child.node_type() {
                return Err(self.misplaced(child, name, "documentation holds plain Markdown only"));
            }
        }

        let content = match (node.children().first(), node.children().last()) {
            (Some(first), Some(last)) => self.source[first.pos_start..last.pos_end]
                .trim()
                .to_string(),
            _ => String::new(),
        };
        let ref_span = node.attribute("ref").map_or(node.open_span(), |a| a.span);
        self.docs.push((
            DocumentationBlock {
                kind,
                reference,
                content,
            },
            ref_span,
        ));
        let span = self.node_span(node);
        self.index.docs.push(span);
        Ok(())
    }

    fn parse_field(
        &mut self,
        node: &Node,
        tag: &str,
        alias: Option<Kind>,
    ) -> Result<Field, ParseError> {
        let declared = match node.attribute("kind") {
            None => None,
            Some(attr) => {
                let AttrValue::String(name) = &attr.value else {
                    return Err(self.wrong_type(attr, "a string"));
                };
                let Some(kind) = Kind::from_name(name) else {
                    return Err(self.malformed(attr, format!("unknown field kind `{name}`")));
                };
                if let Some(alias) = alias {
                    if alias != kind {
                        return Err(self.malformed(
                            attr,
                            format!("`{tag}` fields are always {alias}"),
                        ));
                    }
                }
                Some(kind)
            }
        };
        let Some(kind) = declared.or(alias) else {
            return Err(self.missing_attribute(node, tag, "kind"));
        };

        self.check_attributes(node, tag, |name| tags::is_field_attribute(kind, name))?;
        let id = self.required_id(node, tag)?;
        let label = self.attr_string(node, "label")?.unwrap_or_else(|| id.clone());

        let role = match self.attr_string(node, "role")? {
            Some(role) => {
                if !self.metadata.has_role(&role) {
                    return Err(self.attr_error(
                        node,
                        "role",
                        format!("role `{role}` is not declared in the frontmatter"),
                    ));
                }
                role
            }
            None => DEFAULT_ROLE.to_string(),
        };
        let priority = match self.attr_string(node, "priority")? {
            Some(name) => match Priority::from_name(&name) {
                Some(priority) => priority,
                None => {
                    return Err(self.attr_error(
                        node,
                        "priority",
                        format!("`{name}` is not one of high, medium, low"),
                    ));
                }
            },
            None => Priority::default(),
        };
        let required = self.attr_bool(node, "required")?.unwrap_or(false);

        self.declare_id(&id, node)?;
        let mut field_kind = self.parse_field_kind(node, &id, kind)?;
        let response = self.parse_field_body(node, &id, &mut field_kind)?;

        let span = self.node_span(node);
        self.index.fields.insert(id.clone(), span);
        self.responses.set(&id, response);

        Ok(Field {
            id,
            label,
            role,
            priority,
            required,
            kind: field_kind,
        })
    }

    fn parse_field_kind(&self, node: &Node, id: &str, kind: Kind) -> Result<FieldKind, ParseError> {
        let field_kind = match kind {
            Kind::String => {
                let pattern = match node.attribute("pattern") {
                    None => None,
                    Some(attr) => match &attr.value {
                        AttrValue::String(source) => Some(Pattern::new(source).map_err(|e| {
                            self.malformed(attr, format!("invalid regular expression: {e}"))
                        })?),
                        AttrValue::Null => None,
                        _ => return Err(self.wrong_type(attr, "a string")),
                    },
                };
                let spec = StringSpec {
                    min_length: self.attr_count(node, "minLength")?,
                    max_length: self.attr_count(node, "maxLength")?,
                    pattern,
                };
                self.check_bounds(node, spec.min_length, "maxLength", spec.max_length)?;
                FieldKind::String(spec)
            }
            Kind::Number => {
                let spec = NumberSpec {
                    min: self.attr_number(node, "min")?,
                    max: self.attr_number(node, "max")?,
                    integer: self.attr_bool(node, "integer")?.unwrap_or(false),
                };
                self.check_bounds(node, spec.min, "max", spec.max)?;
                FieldKind::Number(spec)
            }
            Kind::StringList => FieldKind::StringList(self.list_spec(node)?),
            Kind::UrlList => FieldKind::UrlList(self.list_spec(node)?),
            Kind::Checkboxes => {
                let mode = match self.attr_string(node, "checkboxMode")? {
                    None => CheckboxMode::default(),
                    Some(name) => match CheckboxMode::from_name(&name) {
                        Some(mode) => mode,
                        None => {
                            return Err(self.attr_error(
                                node,
                                "checkboxMode",
                                format!("`{name}` is not one of multi, simple, explicit"),
                            ));
                        }
                    },
                };
                FieldKind::Checkboxes(CheckboxesSpec {
                    options: Vec::new(),
                    mode,
                    min_done: self.attr_count(node, "minDone")?,
                })
            }
            Kind::SingleSelect => FieldKind::SingleSelect(SelectSpec::default()),
            Kind::MultiSelect => {
                let spec = SelectSpec {
                    options: Vec::new(),
                    min_selections: self.attr_count(node, "minSelections")?,
                    max_selections: self.attr_count(node, "maxSelections")?,
                };
                self.check_bounds(node, spec.min_selections, "maxSelections", spec.max_selections)?;
                FieldKind::MultiSelect(spec)
            }
            Kind::Url => FieldKind::Url,
            Kind::Date => {
                let spec = DateSpec {
                    min: self.attr_date(node, "min")?,
                    max: self.attr_date(node, "max")?,
                };
                self.check_bounds(node, spec.min.clone(), "max", spec.max.clone())?;
                FieldKind::Date(spec)
            }
            Kind::Year => {
                let spec = YearSpec {
                    min: self.attr_year(node, "min")?,
                    max: self.attr_year(node, "max")?,
                };
                self.check_bounds(node, spec.min, "max", spec.max)?;
                FieldKind::Year(spec)
            }
            Kind::Table => FieldKind::Table(self.table_spec(node, id)?),
        };
        Ok(field_kind)
    }

    fn list_spec(&self, node: &Node) -> Result<ListSpec, ParseError> {
        let spec = ListSpec {
            min_items: self.attr_count(node, "minItems")?,
            max_items: self.attr_count(node, "maxItems")?,
            item_min_length: self.attr_count(node, "itemMinLength")?,
            item_max_length: self.attr_count(node, "itemMaxLength")?,
            unique_items: self.attr_bool(node, "uniqueItems")?.unwrap_or(false),
        };
        self.check_bounds(node, spec.min_items, "maxItems", spec.max_items)?;
        self.check_bounds(node, spec.item_min_length, "itemMaxLength", spec.item_max_length)?;
        Ok(spec)
    }

    fn table_spec(&self, node: &Node, id: &str) -> Result<TableSpec, ParseError> {
        let Some(ids) = self.attr_list(node, "columnIds")? else {
            return Err(self.missing_attribute(node, "table field", "columnIds"));
        };
        if ids.is_empty() {
            return Err(self.attr_error(
                node,
                "columnIds",
                "a table needs at least one column".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for column in &ids {
            if !tags::is_valid_id(column) {
                return Err(self.attr_error(
                    node,
                    "columnIds",
                    format!("`{column}` is not a valid column id"),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(self.attr_error(
                    node,
                    "columnIds",
                    format!("column `{column}` is declared twice"),
                ));
            }
        }

        let labels = self.attr_list(node, "columnLabels")?;
        if let Some(labels) = &labels {
            self.check_column_count(node, "columnLabels", labels.len(), ids.len())?;
        }
        let mut types = Vec::new();
        if let Some(names) = self.attr_list(node, "columnTypes")? {
            self.check_column_count(node, "columnTypes", names.len(), ids.len())?;
            for name in names {
                let Some(cell_type) = CellType::from_name(&name) else {
                    return Err(self.attr_error(
                        node,
                        "columnTypes",
                        format!("unknown column type `{name}`"),
                    ));
                };
                types.push(cell_type);
            }
        }
        let required = self.attr_list(node, "requiredColumns")?.unwrap_or_default();
        for column in &required {
            if !ids.contains(column) {
                let span = node
                    .attribute("requiredColumns")
                    .map_or(node.open_span(), |a| a.span);
                return Err(ParseError::UndeclaredColumn {
                    src: self.named_source(),
                    span: span.into(),
                    field: id.to_string(),
                    column: column.clone(),
                });
            }
        }

        let columns = ids
            .iter()
            .enumerate()
            .map(|(i, column_id)| Column {
                id: column_id.clone(),
                label: labels
                    .as_ref()
                    .and_then(|l| l.get(i).cloned())
                    .unwrap_or_else(|| column_id.clone()),
                cell_type: types.get(i).copied().unwrap_or_default(),
                required: required.contains(column_id),
            })
            .collect();

        let spec = TableSpec {
            columns,
            min_rows: self.attr_count(node, "minRows")?,
            max_rows: self.attr_count(node, "maxRows")?,
        };
        self.check_bounds(node, spec.min_rows, "maxRows", spec.max_rows)?;
        Ok(spec)
    }

    // === Field bodies ===

    fn parse_field_body(
        &self,
        node: &Node,
        id: &str,
        kind: &mut FieldKind,
    ) -> Result<FieldResponse, ParseError> {
        let mut value_fence = None;
        for child in node.children() {
            match child.node_type() {
                NodeType::Tag(name) => {
                    return Err(self.misplaced(
                        child,
                        name,
                        "fields hold only options, a value block or a table",
                    ));
                }
                NodeType::Fence { info, content } if info == tags::VALUE_FENCE => {
                    if value_fence.is_some() {
                        return Err(self.invalid_value(child.span(), id, "more than one value block"));
                    }
                    value_fence = Some((child, content.as_str()));
                }
                NodeType::Annotation(_) if !kind.kind().is_choice() => {
                    return Err(self.invalid_option(
                        child.span(),
                        id,
                        format!("{} fields have no options", kind.kind()),
                    ));
                }
                _ => {}
            }
        }

        match kind {
            FieldKind::Checkboxes(_) | FieldKind::SingleSelect(_) | FieldKind::MultiSelect(_) => {
                self.parse_choice_body(node, id, kind, value_fence)
            }
            FieldKind::Table(spec) => self.parse_table_body(node, id, spec, value_fence),
            _ => {
                let Some((fence, content)) = value_fence else {
                    return Ok(FieldResponse::Unanswered);
                };
                match values::classify(content) {
                    RawValue::Null => Ok(FieldResponse::null()),
                    RawValue::Sentinel(sentinel) => Ok(sentinel_response(sentinel)),
                    RawValue::Text(text) => decode_value(kind, text)
                        .map(FieldResponse::answered)
                        .map_err(|e| self.invalid_value(fence.span(), id, &e.to_string())),
                }
            }
        }
    }

    fn parse_choice_body(
        &self,
        node: &Node,
        id: &str,
        kind: &mut FieldKind,
        value_fence: Option<(&Node, &str)>,
    ) -> Result<FieldResponse, ParseError> {
        let marked = self.parse_options(node, id)?;
        if marked.is_empty() {
            return Err(self.invalid_option(node.open_span(), id, "the field declares no options".to_string()));
        }
        let options: Vec<ChoiceOption> = marked.iter().map(|m| m.option.clone()).collect();

        let from_marks = match kind {
            FieldKind::Checkboxes(spec) => {
                let mut states = BTreeMap::new();
                for m in &marked {
                    let Some(state) = spec.mode.state_for_mark(m.mark) else {
                        return Err(self.invalid_option(
                            m.span,
                            id,
                            format!("`[{}]` is not a valid mark in {} mode", m.mark, spec.mode.as_str()),
                        ));
                    };
                    states.insert(m.option.id.clone(), state);
                }
                spec.options = options;
                if states.values().any(|s| *s != spec.mode.default_state()) {
                    FieldResponse::answered(FieldValue::Checkboxes(states))
                } else {
                    FieldResponse::Unanswered
                }
            }
            FieldKind::SingleSelect(spec) => {
                let selected = self.selected_options(&marked, id)?;
                spec.options = options;
                match selected.as_slice() {
                    [] => FieldResponse::Unanswered,
                    [one] => FieldResponse::answered(FieldValue::SingleSelect(one.clone())),
                    _ => {
                        return Err(self.invalid_value(
                            node.span(),
                            id,
                            "more than one option is selected",
                        ));
                    }
                }
            }
            FieldKind::MultiSelect(spec) => {
                let selected = self.selected_options(&marked, id)?;
                spec.options = options;
                if selected.is_empty() {
                    FieldResponse::Unanswered
                } else {
                    FieldResponse::answered(FieldValue::MultiSelect(selected))
                }
            }
            _ => FieldResponse::Unanswered,
        };

        let Some((fence, content)) = value_fence else {
            return Ok(from_marks);
        };
        let response = match values::classify(content) {
            RawValue::Null => FieldResponse::null(),
            RawValue::Sentinel(sentinel) => sentinel_response(sentinel),
            RawValue::Text(_) => {
                return Err(self.invalid_value(
                    fence.span(),
                    id,
                    "choice fields take their answer from the option marks",
                ));
            }
        };
        if from_marks != FieldResponse::Unanswered {
            log::warn!("field `{id}`: value block overrides the marked options");
        }
        Ok(response)
    }

    /// Collects `- [m] Label {% #option %}` lines in document order.
    fn parse_options(&self, node: &Node, id: &str) -> Result<Vec<MarkedOption>, ParseError> {
        let mut options = Vec::new();
        let mut seen = BTreeSet::new();
        let children = node.children();
        for (i, child) in children.iter().enumerate() {
            match child.node_type() {
                NodeType::Annotation(option_id) => {
                    let line_start = self.source[..child.pos_start]
                        .rfind('\n')
                        .map_or(0, |p| p + 1);
                    let span = Span::new(line_start, child.pos_end);
                    let Some((mark, label)) =
                        parse_option_line(&self.source[line_start..child.pos_start])
                    else {
                        return Err(self.invalid_option(
                            span,
                            id,
                            format!("`#{option_id}` must end a `- [ ] Label` line"),
                        ));
                    };
                    if !seen.insert(option_id.clone()) {
                        return Err(ParseError::DuplicateId {
                            src: self.named_source(),
                            span: span.into(),
                            id: format!("{id}.{option_id}"),
                        });
                    }
                    let label = if label.is_empty() {
                        option_id.clone()
                    } else {
                        label
                    };
                    options.push(MarkedOption {
                        option: ChoiceOption {
                            id: option_id.clone(),
                            label,
                        },
                        mark,
                        span,
                    });
                }
                NodeType::Text(text) => {
                    let annotated_tail = matches!(
                        children.get(i + 1).map(|c| c.node_type()),
                        Some(NodeType::Annotation(_))
                    );
                    let mut lines: Vec<&str> = text.split('\n').collect();
                    if annotated_tail {
                        lines.pop();
                    }
                    if let Some(line) = lines.iter().find(|l| parse_option_line(l).is_some()) {
                        return Err(self.invalid_option(
                            child.span(),
                            id,
                            format!("`{}` has no `{{% #id %}}` annotation", line.trim()),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(options)
    }

    fn selected_options(&self, marked: &[MarkedOption], id: &str) -> Result<Vec<String>, ParseError> {
        let mut selected = Vec::new();
        for m in marked {
            match m.mark {
                ' ' => {}
                'x' | 'X' => selected.push(m.option.id.clone()),
                other => {
                    return Err(self.invalid_option(
                        m.span,
                        id,
                        format!("`[{other}]` is not a select mark; use `[ ]` or `[x]`"),
                    ));
                }
            }
        }
        Ok(selected)
    }

    fn parse_table_body(
        &self,
        node: &Node,
        id: &str,
        spec: &mut TableSpec,
        value_fence: Option<(&Node, &str)>,
    ) -> Result<FieldResponse, ParseError> {
        let grid_text: String = node
            .children()
            .iter()
            .filter_map(|c| match c.node_type() {
                NodeType::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if let Some((fence, content)) = value_fence {
            if !grid_text.trim().is_empty() {
                log::warn!("field `{id}`: value block overrides the table rows");
            }
            return match values::classify(content) {
                RawValue::Null => Ok(FieldResponse::null()),
                RawValue::Sentinel(sentinel) => Ok(sentinel_response(sentinel)),
                RawValue::Text(_) => Err(self.invalid_value(
                    fence.span(),
                    id,
                    "a table's value block may only hold `%SKIP%`, `%ABORT%` or nothing",
                )),
            };
        }
        if grid_text.trim().is_empty() {
            return Ok(FieldResponse::Unanswered);
        }

        let grid = table::parse_grid(&grid_text)
            .map_err(|e| self.invalid_table(node.span(), id, e.to_string()))?;
        self.check_header(node, id, spec, &grid)?;
        if node.attribute("columnLabels").is_none() {
            for (column, header) in spec.columns.iter_mut().zip(&grid.headers) {
                if !header.is_empty() {
                    column.label = header.clone();
                }
            }
        }

        let mut rows = Vec::with_capacity(grid.rows.len());
        for (i, cells) in grid.rows.iter().enumerate() {
            if cells.len() != spec.columns.len() {
                let err = TableError::RaggedRow {
                    row: i + 1,
                    expected: spec.columns.len(),
                    found: cells.len(),
                };
                return Err(self.invalid_table(node.span(), id, err.to_string()));
            }
            let mut row = TableRowResponse::new();
            for (column, text) in spec.columns.iter().zip(cells) {
                let cell = table::parse_cell(text, column.cell_type).map_err(|source| {
                    let err = ValueError::Cell {
                        column: column.id.clone(),
                        source: Box::new(source),
                    };
                    self.invalid_value(node.span(), id, &format!("row {}: {err}", i + 1))
                })?;
                row.insert(column.id.clone(), cell);
            }
            rows.push(row);
        }
        Ok(FieldResponse::answered(FieldValue::Table(rows)))
    }

    fn check_header(&self, node: &Node, id: &str, spec: &TableSpec, grid: &Grid) -> Result<(), ParseError> {
        let declared = spec.columns.len();
        if let Some(extra) = grid.headers.get(declared) {
            return Err(ParseError::UndeclaredColumn {
                src: self.named_source(),
                span: node.get_source_span(),
                field: id.to_string(),
                column: extra.clone(),
            });
        }
        if grid.headers.len() < declared {
            return Err(self.invalid_table(
                node.span(),
                id,
                format!(
                    "the header names {} columns but {declared} are declared",
                    grid.headers.len()
                ),
            ));
        }
        Ok(())
    }

    // === Attributes ===

    fn check_attributes<F>(&self, node: &Node, tag: &str, allowed: F) -> Result<(), ParseError>
    where
        F: Fn(&str) -> bool,
    {
        let mut seen = BTreeSet::new();
        for attr in node.attributes() {
            if !allowed(&attr.name) {
                return Err(self.malformed(attr, format!("not a valid attribute of `{tag}`")));
            }
            if !seen.insert(attr.name.as_str()) {
                return Err(self.malformed(attr, "given more than once".to_string()));
            }
        }
        Ok(())
    }

    fn required_id(&self, node: &Node, tag: &str) -> Result<String, ParseError> {
        let Some(id) = self.attr_string(node, "id")? else {
            return Err(self.missing_attribute(node, tag, "id"));
        };
        if !tags::is_valid_id(&id) {
            return Err(self.attr_error(
                node,
                "id",
                "ids may only contain letters, digits, '_' and '-'".to_string(),
            ));
        }
        Ok(id)
    }

    fn declare_id(&mut self, id: &str, node: &Node) -> Result<(), ParseError> {
        if !self.ids.contains_key(id) {
            let position = self.ids.len();
            self.ids.insert(id.to_string(), position);
            return Ok(());
        }
        Err(ParseError::DuplicateId {
            src: self.named_source(),
            span: node.open_span().into(),
            id: id.to_string(),
        })
    }

    /// A `MalformedAttribute` pointing at `name`, or at the whole opening tag if it is absent.
    fn attr_error(&self, node: &Node, name: &str, reason: String) -> ParseError {
        ParseError::MalformedAttribute {
            src: self.named_source(),
            span: node.attribute(name).map_or(node.open_span(), |a| a.span).into(),
            attribute: name.to_string(),
            reason,
        }
    }

    fn attr_string(&self, node: &Node, name: &str) -> Result<Option<String>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::String(s) => Ok(Some(s.clone())),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "a string")),
            },
        }
    }

    fn attr_number(&self, node: &Node, name: &str) -> Result<Option<f64>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::Number(n) => Ok(Some(*n)),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "a number")),
            },
        }
    }

    fn attr_bool(&self, node: &Node, name: &str) -> Result<Option<bool>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::Bool(b) => Ok(Some(*b)),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "true or false")),
            },
        }
    }

    fn attr_count(&self, node: &Node, name: &str) -> Result<Option<usize>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(Some(*n as usize)),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "a non-negative integer")),
            },
        }
    }

    fn attr_year(&self, node: &Node, name: &str) -> Result<Option<i32>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::Number(n) => values::year_from_number(*n)
                    .map(Some)
                    .map_err(|e| self.malformed(attr, e.to_string())),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "a year")),
            },
        }
    }

    fn attr_date(&self, node: &Node, name: &str) -> Result<Option<String>, ParseError> {
        match node.attribute(name) {
            None => Ok(None),
            Some(attr) => match &attr.value {
                AttrValue::String(s) => values::parse_date(s)
                    .map(Some)
                    .map_err(|e| self.malformed(attr, e.to_string())),
                AttrValue::Null => Ok(None),
                _ => Err(self.wrong_type(attr, "a YYYY-MM-DD string")),
            },
        }
    }

    fn attr_list(&self, node: &Node, name: &str) -> Result<Option<Vec<String>>, ParseError> {
        let Some(attr) = node.attribute(name) else {
            return Ok(None);
        };
        match &attr.value {
            AttrValue::Null => Ok(None),
            AttrValue::List(items) => items
                .iter()
                .map(|item| match item {
                    AttrValue::String(s) => Ok(s.clone()),
                    _ => Err(self.wrong_type(attr, "a list of strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            _ => Err(self.wrong_type(attr, "a list of strings")),
        }
    }

    fn check_bounds<T: PartialOrd>(
        &self,
        node: &Node,
        min: Option<T>,
        max_name: &str,
        max: Option<T>,
    ) -> Result<(), ParseError> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(self.attr_error(
                    node,
                    max_name,
                    "the upper bound is below the lower bound".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_column_count(
        &self,
        node: &Node,
        name: &str,
        found: usize,
        declared: usize,
    ) -> Result<(), ParseError> {
        if found == declared {
            return Ok(());
        }
        Err(self.attr_error(
            node,
            name,
            format!("lists {found} entries for {declared} declared columns"),
        ))
    }

    // === Errors ===

    fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, self.source.to_string())
    }

    fn tag_kind(&self, node: &Node, name: &str) -> Result<TagKind, ParseError> {
        tags::lookup(name).ok_or_else(|| ParseError::UnknownTag {
            src: self.named_source(),
            span: node.open_span().into(),
            name: name.to_string(),
        })
    }

    fn misplaced(&self, node: &Node, name: &str, reason: &str) -> ParseError {
        ParseError::MisplacedTag {
            src: self.named_source(),
            span: node.open_span().into(),
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    fn missing_attribute(&self, node: &Node, tag: &str, attribute: &str) -> ParseError {
        ParseError::MissingAttribute {
            src: self.named_source(),
            span: node.open_span().into(),
            tag: tag.to_string(),
            attribute: attribute.to_string(),
        }
    }

    fn malformed(&self, attr: &Attribute, reason: String) -> ParseError {
        ParseError::MalformedAttribute {
            src: self.named_source(),
            span: attr.span.into(),
            attribute: attr.name.clone(),
            reason,
        }
    }

    fn wrong_type(&self, attr: &Attribute, expected: &str) -> ParseError {
        self.malformed(
            attr,
            format!("expected {expected}, found {}", attr.value.type_name()),
        )
    }

    fn invalid_value(&self, span: Span, field: &str, reason: &str) -> ParseError {
        ParseError::InvalidValue {
            src: self.named_source(),
            span: span.into(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    fn invalid_option(&self, span: Span, field: &str, reason: String) -> ParseError {
        ParseError::InvalidOption {
            src: self.named_source(),
            span: span.into(),
            field: field.to_string(),
            reason,
        }
    }

    fn invalid_table(&self, span: Span, field: &str, reason: String) -> ParseError {
        ParseError::InvalidTable {
            src: self.named_source(),
            span: span.into(),
            field: field.to_string(),
            reason,
        }
    }

    fn node_span(&self, node: &Node) -> NodeSpan {
        let span = node.span();
        NodeSpan {
            span,
            open_tag: node.open_span(),
            lines: line_range(self.source, span.start, span.end),
        }
    }
}

struct MarkedOption {
    option: ChoiceOption,
    mark: char,
    span: Span,
}

/// Splits `- [m] Label` into its mark and label.
fn parse_option_line(line: &str) -> Option<(char, String)> {
    let rest = line.trim_start();
    let rest = rest
        .strip_prefix('-')
        .or_else(|| rest.strip_prefix('*'))
        .or_else(|| rest.strip_prefix('+'))?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('[')?;
    let mut chars = rest.chars();
    let mark = chars.next()?;
    let label = chars.as_str().strip_prefix(']')?;
    Some((mark, label.trim().to_string()))
}

fn sentinel_response(sentinel: Sentinel) -> FieldResponse {
    match sentinel {
        Sentinel::Skip(reason) => FieldResponse::Skipped { reason },
        Sentinel::Abort(reason) => FieldResponse::Aborted { reason },
    }
}

/// Decodes the text of a value block for a scalar or list field.
pub(crate) fn decode_value(kind: &FieldKind, text: &str) -> Result<FieldValue, ValueError> {
    let items = || -> Vec<&str> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    };
    let value = match kind {
        FieldKind::String(_) => FieldValue::String(text.to_string()),
        FieldKind::Number(_) => FieldValue::Number(values::parse_number(text)?),
        FieldKind::StringList(_) => {
            FieldValue::StringList(items().into_iter().map(str::to_string).collect())
        }
        FieldKind::Url => FieldValue::Url(values::parse_url(text)?),
        FieldKind::UrlList(_) => FieldValue::UrlList(
            items()
                .into_iter()
                .map(values::parse_url)
                .collect::<Result<_, _>>()?,
        ),
        FieldKind::Date(_) => FieldValue::Date(values::parse_date(text)?),
        FieldKind::Year(_) => FieldValue::Year(values::parse_year(text)?),
        FieldKind::Checkboxes(_)
        | FieldKind::SingleSelect(_)
        | FieldKind::MultiSelect(_)
        | FieldKind::Table(_) => return Err(ValueError::Unsupported { kind: kind.kind() }),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"---
title: Intake
---
# Intake

{% form id="intake" title="Intake" %}

{% group id="about" title="About you" %}

{% field kind="string" id="name" label="Name" required=true maxLength=40 %}
```value
Ada Lovelace
```
{% /field %}

{% number-field id="age" label="Age" min=0 max=120 %}{% /number-field %}

{% checkboxes id="tasks" label="Tasks" %}
- [x] Read {% #read %}
- [ ] Write {% #write %}
{% /checkboxes %}

{% table-field id="people" label="People" columnIds=["name", "age"] columnTypes=["string", "number"] %}
| Name | Age |
|---|---|
| Ann | 30 |
| Bob | %SKIP% (Unknown) |
{% /table-field %}

{% /group %}

{% description ref="name" %}Your legal name.{% /description %}
{% /form %}
"##;

    fn parse(source: &str) -> Result<ParsedDocument, ParseError> {
        FormParser::new_with_name(source, "test.form.md".to_string()).parse_document()
    }

    #[test]
    fn test_parse_sample() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.schema.id, "intake");
        let ids: Vec<&str> = doc.schema.fields().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["name", "age", "tasks", "people"]);

        assert_eq!(
            doc.responses.get("name"),
            &FieldResponse::answered(FieldValue::String("Ada Lovelace".to_string()))
        );
        assert_eq!(doc.responses.get("age"), &FieldResponse::Unanswered);

        let FieldResponse::Answered {
            value: Some(FieldValue::Checkboxes(states)),
        } = doc.responses.get("tasks")
        else {
            panic!("tasks should be answered");
        };
        assert_eq!(states.get("read"), Some(&CheckboxState::Done));
        assert_eq!(states.get("write"), Some(&CheckboxState::Todo));

        let FieldResponse::Answered {
            value: Some(FieldValue::Table(rows)),
        } = doc.responses.get("people")
        else {
            panic!("people should be answered");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1].get("age"),
            Some(&CellResponse::Skipped {
                reason: Some("Unknown".to_string())
            })
        );

        let people = doc.schema.field("people").unwrap();
        let FieldKind::Table(spec) = &people.kind else {
            panic!("people is a table");
        };
        assert_eq!(spec.columns[0].label, "Name");
        assert_eq!(spec.columns[1].cell_type, CellType::Number);

        assert_eq!(doc.schema.docs.len(), 1);
        assert_eq!(doc.schema.docs[0].content, "Your legal name.");
        assert_eq!(doc.index.docs.len(), 1);
    }

    #[test]
    fn test_source_index_lines() {
        let doc = parse(SAMPLE).unwrap();
        let name = doc.index.fields["name"];
        assert_eq!(&SAMPLE[name.open_tag.start..name.open_tag.start + 8], "{% field");
        assert!(SAMPLE[name.span.start..name.span.end].ends_with("{% /field %}"));
        assert_eq!(name.lines, (10, 14));
        assert!(doc.index.frontmatter.is_some());
    }

    #[test]
    fn test_numeric_option_ids() {
        let source = "{% form id=\"f\" %}\n{% group id=\"g\" %}\n\
{% single-select id=\"pick\" %}\n\
- [ ] Zero one {% #01 %}\n\
- [ ] One {% #1 %}\n\
- [x] Thousand {% #1e3 %}\n\
{% /single-select %}\n{% /group %}\n{% /form %}\n";
        let doc = parse(source).unwrap();
        let pick = doc.schema.field("pick").unwrap();
        let ids: Vec<&str> = pick.kind.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["01", "1", "1e3"]);
        assert_eq!(
            doc.responses.get("pick"),
            &FieldResponse::answered(FieldValue::SingleSelect("1e3".to_string()))
        );
    }

    #[test]
    fn test_field_defaults() {
        let doc = parse(SAMPLE).unwrap();
        let age = doc.schema.field("age").unwrap();
        assert_eq!(age.role, DEFAULT_ROLE);
        assert_eq!(age.priority, Priority::Medium);
        assert!(!age.required);
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% field kind=\"string\" id=\"a\" /%}\n{% field kind=\"number\" id=\"a\" /%}\n{% /group %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::DuplicateId { id, .. }) if id == "a"));
    }

    #[test]
    fn test_group_and_field_share_id_space() {
        let source = "{% form id=\"f\" %}{% group id=\"a\" %}\n{% field kind=\"string\" id=\"a\" /%}\n{% /group %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::DuplicateId { .. })));
    }

    #[test]
    fn test_undeclared_required_column() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% table-field id=\"t\" columnIds=[\"a\"] requiredColumns=[\"b\"] /%}\n{% /group %}{% /form %}";
        assert!(matches!(
            parse(source),
            Err(ParseError::UndeclaredColumn { column, .. }) if column == "b"
        ));
    }

    #[test]
    fn test_header_with_extra_column() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% table-field id=\"t\" columnIds=[\"a\"] %}\n| A | B |\n|---|---|\n{% /table-field %}\n{% /group %}{% /form %}";
        assert!(matches!(
            parse(source),
            Err(ParseError::UndeclaredColumn { column, .. }) if column == "B"
        ));
    }

    #[test]
    fn test_unknown_attribute_is_fatal() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% field kind=\"string\" id=\"a\" min=3 /%}\n{% /group %}{% /form %}";
        assert!(matches!(
            parse(source),
            Err(ParseError::MalformedAttribute { attribute, .. }) if attribute == "min"
        ));
    }

    #[test]
    fn test_undeclared_role() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% field kind=\"string\" id=\"a\" role=\"reviewer\" /%}\n{% /group %}{% /form %}";
        assert!(matches!(
            parse(source),
            Err(ParseError::MalformedAttribute { attribute, .. }) if attribute == "role"
        ));
    }

    #[test]
    fn test_missing_form() {
        assert!(matches!(parse("# Just prose\n"), Err(ParseError::MissingForm { .. })));
    }

    #[test]
    fn test_field_outside_group() {
        let source = "{% form id=\"f\" %}\n{% field kind=\"string\" id=\"a\" /%}\n{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::MisplacedTag { .. })));
    }

    #[test]
    fn test_unknown_tag() {
        let source = "{% form id=\"f\" %}{% widget %}{% /widget %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::UnknownTag { name, .. }) if name == "widget"));
    }

    #[test]
    fn test_doc_reference_must_exist() {
        let source = "{% form id=\"f\" %}{% /form %}\n{% instructions ref=\"nope\" %}Hi{% /instructions %}";
        assert!(matches!(
            parse(source),
            Err(ParseError::UndeclaredReference { name, .. }) if name == "nope"
        ));
    }

    #[test]
    fn test_sentinel_value_overrides_marks() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% single-select id=\"s\" %}\n- [x] A {% #a %}\n- [ ] B {% #b %}\n```value\n%SKIP% (Not relevant)\n```\n{% /single-select %}\n{% /group %}{% /form %}";
        let doc = parse(source).unwrap();
        assert_eq!(
            doc.responses.get("s"),
            &FieldResponse::Skipped {
                reason: Some("Not relevant".to_string())
            }
        );
    }

    #[test]
    fn test_option_without_annotation() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% multi-select id=\"m\" %}\n- [ ] A {% #a %}\n- [ ] B\n{% /multi-select %}\n{% /group %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::InvalidOption { .. })));
    }

    #[test]
    fn test_invalid_mark_for_mode() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% checkboxes id=\"c\" checkboxMode=\"simple\" %}\n- [/] A {% #a %}\n{% /checkboxes %}\n{% /group %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::InvalidOption { .. })));
    }

    #[test]
    fn test_bad_number_value() {
        let source = "{% form id=\"f\" %}{% group id=\"g\" %}\n{% number-field id=\"n\" %}\n```value\nlots\n```\n{% /number-field %}\n{% /group %}{% /form %}";
        assert!(matches!(parse(source), Err(ParseError::InvalidValue { field, .. }) if field == "n"));
    }

    #[test]
    fn test_option_line_shapes() {
        assert_eq!(parse_option_line("- [x] Yes "), Some(('x', "Yes".to_string())));
        assert_eq!(parse_option_line("  * [ ] No"), Some((' ', "No".to_string())));
        assert_eq!(parse_option_line("-[x] Tight"), None);
        assert_eq!(parse_option_line("Some prose"), None);
    }
}
