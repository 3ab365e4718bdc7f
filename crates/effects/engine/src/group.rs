//! Effect group definitions.
//!
//! An [`EffectGroup`] is a named rule owned by a source entity type: while its
//! activation expression holds, every entity its scope expression designates
//! receives the group's [`Effect`]s.

use std::fmt;
use std::ops::{Add, Mul};
use std::sync::Arc;

use effects_core::{
    DynamicEntity, EntityType, PropertyDefinition, PropertyValue, RegistryError, TypeRegistry,
    TypeToken,
};

use crate::binding::{BindingContext, EffectBinding, PropertyEffectBinding};
use crate::script::{FromScriptValue, RuntimeParameters, SOURCE_PARAMETER, ScriptValue};

/// Combines `(base, current, operand)` into the property's next value.
pub type EffectOperation<T> = Arc<dyn Fn(&T, &T, &T) -> T + Send + Sync>;

// ============================================================================
// Effect
// ============================================================================

/// One property change applied to every target of a group.
#[derive(Clone)]
pub struct Effect {
    kind: Arc<dyn EffectKind>,
    value_expression: String,
    description_expression: Option<String>,
}

impl Effect {
    /// Applies `operation` with the value of `value_expression` as operand.
    pub fn new<T: PropertyValue + FromScriptValue>(
        property: Arc<PropertyDefinition<T>>,
        value_expression: impl Into<String>,
        operation: EffectOperation<T>,
    ) -> Self {
        Self {
            kind: Arc::new(PropertyEffect {
                property,
                operation,
            }),
            value_expression: value_expression.into(),
            description_expression: None,
        }
    }

    /// Adds the operand to the running value.
    pub fn offset<T>(property: Arc<PropertyDefinition<T>>, value_expression: impl Into<String>) -> Self
    where
        T: PropertyValue + FromScriptValue + Add<Output = T>,
    {
        Self::new(
            property,
            value_expression,
            Arc::new(|_base: &T, current: &T, operand: &T| current.clone() + operand.clone()),
        )
    }

    /// Multiplies the running value by the operand.
    pub fn scale<T>(property: Arc<PropertyDefinition<T>>, value_expression: impl Into<String>) -> Self
    where
        T: PropertyValue + FromScriptValue + Mul<Output = T>,
    {
        Self::new(
            property,
            value_expression,
            Arc::new(|_base: &T, current: &T, operand: &T| current.clone() * operand.clone()),
        )
    }

    /// Overrides the running value with the operand.
    pub fn replace<T: PropertyValue + FromScriptValue>(
        property: Arc<PropertyDefinition<T>>,
        value_expression: impl Into<String>,
    ) -> Self {
        Self::new(
            property,
            value_expression,
            Arc::new(|_base: &T, _current: &T, operand: &T| operand.clone()),
        )
    }

    pub fn with_description(mut self, expression: impl Into<String>) -> Self {
        self.description_expression = Some(expression.into());
        self
    }

    pub fn property_name(&self) -> &str {
        self.kind.property_name()
    }

    pub fn value_expression(&self) -> &str {
        &self.value_expression
    }

    pub fn description_expression(&self) -> Option<&str> {
        self.description_expression.as_deref()
    }

    pub(crate) fn bind(&self, target: &DynamicEntity, context: BindingContext) -> Arc<dyn EffectBinding> {
        self.kind.bind(self, target, context)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("property", &self.property_name())
            .field("value_expression", &self.value_expression)
            .field("description_expression", &self.description_expression)
            .finish()
    }
}

/// Creates bindings for one property value type.
trait EffectKind: Send + Sync {
    fn property_name(&self) -> &str;

    fn bind(
        &self,
        effect: &Effect,
        target: &DynamicEntity,
        context: BindingContext,
    ) -> Arc<dyn EffectBinding>;
}

struct PropertyEffect<T: PropertyValue> {
    property: Arc<PropertyDefinition<T>>,
    operation: EffectOperation<T>,
}

impl<T: PropertyValue + FromScriptValue> EffectKind for PropertyEffect<T> {
    fn property_name(&self) -> &str {
        self.property.name()
    }

    fn bind(
        &self,
        effect: &Effect,
        target: &DynamicEntity,
        context: BindingContext,
    ) -> Arc<dyn EffectBinding> {
        Arc::new(PropertyEffectBinding::new(
            Arc::clone(&self.property),
            Arc::clone(&self.operation),
            target.clone(),
            effect.value_expression.clone(),
            effect.description_expression.clone(),
            context,
        ))
    }
}

// ============================================================================
// EffectGroup
// ============================================================================

/// An expression with an optional human-readable description expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupExpression {
    pub value: String,
    pub description: Option<String>,
}

impl GroupExpression {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EffectGroup {
    name: String,
    source_type: TypeToken,
    activation: Option<GroupExpression>,
    scope: GroupExpression,
    effects: Vec<Effect>,
    parameters: RuntimeParameters,
}

impl EffectGroup {
    /// Creates a group applying to sources of type `source_type` or a subtype.
    pub fn new(name: impl Into<String>, source_type: TypeToken, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type,
            activation: None,
            scope: GroupExpression::new(scope),
            effects: Vec::new(),
            parameters: RuntimeParameters::new(),
        }
    }

    pub fn for_source<E: EntityType>(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(name, TypeToken::of::<E>(), scope)
    }

    /// Gates the group on a boolean expression. Without one the group is always active.
    pub fn with_activation(mut self, expression: impl Into<String>) -> Self {
        let description = self.activation.take().and_then(|a| a.description);
        self.activation = Some(GroupExpression {
            value: expression.into(),
            description,
        });
        self
    }

    /// Sets the activation description. Ignored if the group has no activation.
    pub fn describe_activation(mut self, expression: impl Into<String>) -> Self {
        if let Some(activation) = self.activation.as_mut() {
            activation.description = Some(expression.into());
        }
        self
    }

    pub fn describe_scope(mut self, expression: impl Into<String>) -> Self {
        self.scope.description = Some(expression.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Adds a named value visible to every expression of the group.
    ///
    /// `source` and `target` are reserved and always overridden by the engine.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> TypeToken {
        self.source_type
    }

    pub fn activation(&self) -> Option<&GroupExpression> {
        self.activation.as_ref()
    }

    pub fn scope(&self) -> &GroupExpression {
        &self.scope
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn parameters(&self) -> &RuntimeParameters {
        &self.parameters
    }

    /// Parameters for evaluating the group's expressions on behalf of `source`.
    pub fn parameters_for(&self, source: &DynamicEntity) -> RuntimeParameters {
        self.parameters
            .clone()
            .with(SOURCE_PARAMETER, source.clone())
    }

    /// Returns true if `source` is of the group's source type or derives from it.
    pub fn applies_to(&self, source: &DynamicEntity) -> Result<bool, RegistryError> {
        let required = TypeRegistry::global().resolve(self.source_type)?;
        Ok(source.entity_type()?.is_instance_of(&required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use effects_core::{Entity, EntityType};

    struct Hive;
    impl EntityType for Hive {
        const NAME: &'static str = "GroupTestHive";
        type Base = Entity;
    }

    struct Nest;
    impl EntityType for Nest {
        const NAME: &'static str = "GroupTestNest";
        type Base = Hive;
    }

    struct Comet;
    impl EntityType for Comet {
        const NAME: &'static str = "GroupTestComet";
        type Base = Entity;
    }

    #[test]
    fn groups_apply_to_derived_sources() {
        let group = EffectGroup::for_source::<Hive>("Swarm", "source.Neighbors");

        assert!(group.applies_to(&DynamicEntity::new::<Hive>()).expect("hive"));
        assert!(group.applies_to(&DynamicEntity::new::<Nest>()).expect("nest"));
        assert!(!group.applies_to(&DynamicEntity::new::<Comet>()).expect("comet"));
    }

    #[test]
    fn builder_keeps_descriptions_and_parameters() {
        let group = EffectGroup::for_source::<Hive>("Swarm", "source.Neighbors")
            .describe_activation("ignored without activation")
            .with_activation("source.Size > 3")
            .describe_activation("'Large hive'")
            .with_activation("source.Size > 4")
            .describe_scope("'Neighbors'")
            .with_parameter("bonus", 5);

        let activation = group.activation().expect("activation");
        assert_eq!(activation.value, "source.Size > 4");
        assert_eq!(activation.description.as_deref(), Some("'Large hive'"));
        assert_eq!(group.scope().description.as_deref(), Some("'Neighbors'"));

        let source = DynamicEntity::new::<Nest>();
        let parameters = group.parameters_for(&source);
        assert_eq!(parameters.source(), Some(&source));
        assert_eq!(parameters.get("bonus"), Some(&ScriptValue::Int(5)));
    }

    #[test]
    fn reserved_parameters_are_overridden() {
        let group = EffectGroup::for_source::<Hive>("Swarm", "scope")
            .with_parameter(SOURCE_PARAMETER, "spoofed");
        let source = DynamicEntity::new::<Hive>();

        assert_eq!(group.parameters_for(&source).source(), Some(&source));
    }
}
